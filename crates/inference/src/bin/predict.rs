use clap::Parser;
use inference::cli::{run_predict, PredictArgs};

fn main() -> anyhow::Result<()> {
    let args = PredictArgs::parse();
    run_predict(args)
}
