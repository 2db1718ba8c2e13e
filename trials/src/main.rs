extern crate getopts;
use getopts::Options;
use std::{env, path::PathBuf, process};

mod bake_off;

use bake_off::{bake_off, report};

struct Args {
    epochs: usize,
    seed: u64,
    root: PathBuf,
}

fn parse_args() -> Args {
    fn print_usage(program: &str, opts: Options) {
        let brief = format!("Usage: {} [options]", program);
        print!("{}", opts.usage(&brief));
    }

    let args = env::args().collect::<Vec<String>>();
    let program = args[0].clone();
    let mut opts = Options::new();

    opts.optopt("e", "epochs", "Epochs per training phase", "30");
    opts.optopt("s", "seed", "Seed for data and weights", "20");
    opts.optopt(
        "d",
        "dir",
        "Root for the per-run checkpoint directories",
        "./checkpoints/trials",
    );
    opts.optflag("h", "help", "Print this help.");

    let matches = match opts.parse(&args[1..]) {
        Ok(m) => m,
        Err(e) => {
            eprintln!("{}", e);
            print_usage(&program, opts);
            process::exit(1);
        }
    };

    if matches.opt_present("h") {
        print_usage(&program, opts);
        process::exit(0);
    }

    let parsed = (
        matches.opt_get_default("e", 30usize),
        matches.opt_get_default("s", 20u64),
    );

    match parsed {
        (Ok(epochs), Ok(seed)) if epochs > 0 => Args {
            epochs,
            seed,
            root: PathBuf::from(
                matches
                    .opt_str("d")
                    .unwrap_or_else(|| "./checkpoints/trials".into()),
            ),
        },
        _ => {
            eprintln!("epochs and seed must be non-negative integers, epochs above zero");
            print_usage(&program, opts);
            process::exit(1);
        }
    }
}

fn main() {
    let args = parse_args();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    match bake_off(args.epochs, args.seed, &args.root) {
        Ok((a, b)) => println!("{}", report(&a, &b)),
        Err(e) => {
            eprintln!("(trials) bake off failed: {}", e);
            process::exit(1)
        }
    }
}
