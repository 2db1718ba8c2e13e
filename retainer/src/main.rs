extern crate getopts;
use getopts::Options;
use log::info;
use std::{env, process};

use retainer::{task_loop, CheckpointStore, Config, FeedForward, Splits, TaskLoop};

struct Args {
    config_path: Option<String>,
    data_path: Option<String>,
    verbose: bool,
}

fn parse_args() -> Args {
    fn print_usage(program: &str, opts: Options) {
        let brief = format!("Usage: {} [options]", program);
        print!("{}", opts.usage(&brief));
    }

    let args = env::args().collect::<Vec<String>>();
    let program = args[0].clone();
    let mut opts = Options::new();

    opts.optopt(
        "f",
        "file",
        "Retainer configuration file, defaults are used when absent",
        "/path/to/retainer.cfg.json",
    );
    opts.optopt(
        "d",
        "data",
        "JSON dataset with train, valid and test splits, synthetic blobs when absent",
        "/path/to/data.json",
    );
    opts.optflag(
        "g",
        "generate-config",
        "Generate a config at your current path.",
    );
    opts.optflag("v", "verbose", "Log every epoch.");
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

    if matches.opt_present("g") {
        let config = Config::new();
        match config.dump("./retainer.cfg.json") {
            Ok(c) => c,
            Err(e) => {
                eprintln!("failed to write config: {}", e);
                process::exit(1)
            }
        };

        process::exit(0);
    }

    Args {
        config_path: matches.opt_str("f"),
        data_path: matches.opt_str("d"),
        verbose: matches.opt_present("v"),
    }
}

fn run(args: &Args) -> retainer::Result<()> {
    let config = match &args.config_path {
        Some(path) => Config::load(path)?,
        None => Config::new(),
    };

    let data = match &args.data_path {
        Some(path) => Splits::load_json(path, config.num_classes(), config.batch_size)?,
        None => Splits::synthetic(&config)?,
    };

    let network = FeedForward::new(&config.layers, config.seed);
    info!("Total params: {:.2}K", network.num_params() as f64 / 1000.);

    let store = CheckpointStore::open(&config.checkpoint_dir)?;
    let mut task_loop = TaskLoop::new(config, network, store)?;
    let records = task_loop.run(&data)?;

    println!("{}", task_loop::summary(&records));
    Ok(())
}

fn main() {
    let args = parse_args();

    let level = match args.verbose {
        true => "debug",
        false => "info",
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    if let Err(e) = run(&args) {
        eprintln!("(retainer) failed with error: {}", e);
        process::exit(1)
    }
}
