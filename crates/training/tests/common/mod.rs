#![allow(dead_code)]

use image::{Rgb, RgbImage};
use std::fs;
use std::path::Path;

pub const CLASSES: [&str; 3] = ["vehicle", "person", "others"];

/// `n_train` labeled images spread evenly over the classes plus `n_test` unlabeled ones.
pub fn write_dataset(root: &Path, n_train: usize, n_test: usize) -> anyhow::Result<Vec<String>> {
    fs::create_dir_all(root.join("train"))?;
    fs::create_dir_all(root.join("test"))?;
    let mut train_csv = String::from("file,label\n");
    for i in 0..n_train {
        let class = i % CLASSES.len();
        let name = format!("img_{i:03}.jpg");
        let mut img = RgbImage::new(48, 40);
        for (x, y, px) in img.enumerate_pixels_mut() {
            let base = [(class == 0) as u8, (class == 1) as u8, (class == 2) as u8];
            let shade = ((x + y + i as u32) % 32) as u8;
            *px = Rgb([base[0] * 200 + shade, base[1] * 200 + shade, base[2] * 200 + shade]);
        }
        img.save(root.join("train").join(&name))?;
        train_csv.push_str(&format!("{name},{}\n", CLASSES[class]));
    }
    fs::write(root.join("train_files.csv"), train_csv)?;

    // Deliberately not sorted, so order checks mean something.
    let mut test_files = Vec::with_capacity(n_test);
    let mut test_csv = String::from("file\n");
    for i in (0..n_test).rev() {
        let name = format!("test_{i:02}.png");
        RgbImage::from_pixel(30, 50, Rgb([(i * 20) as u8, 90, 160])).save(root.join("test").join(&name))?;
        test_csv.push_str(&format!("{name}\n"));
        test_files.push(name);
    }
    fs::write(root.join("test_files.csv"), test_csv)?;
    Ok(test_files)
}

pub fn read_submission(path: &Path) -> anyhow::Result<Vec<(String, String)>> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers = reader.headers()?.clone();
    assert_eq!(headers.iter().collect::<Vec<_>>(), vec!["file", "label"]);
    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record?;
        rows.push((record[0].to_string(), record[1].to_string()));
    }
    Ok(rows)
}
