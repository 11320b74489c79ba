use std::path::PathBuf;

use clap::{value_parser, Arg};
use log::{error, info};
use traffic_client::{seed, WorkloadConfig};

fn main() {
    env_logger::init();

    let clap = clap::command!()
        .arg_required_else_help(true)
        .about("Client of a request/response traffic generator")
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .help("Configuration file describing servers and workload")
                .required(true)
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("seed")
                .long("seed")
                .short('s')
                .help("Random seed value, 0 derives one from the current time")
                .default_value("0")
                .value_parser(value_parser!(u64)),
        )
        .get_matches();

    let config_file = clap.get_one::<PathBuf>("config").unwrap();
    let random_seed = seed::resolve_seed(*clap.get_one::<u64>("seed").unwrap());
    info!("Using random seed {}", random_seed);
    let mut rng = seed::startup_rng(random_seed);

    let mut config = match WorkloadConfig::from_file(config_file) {
        Ok(config) => config,
        Err(err) => {
            error!("{}", err);
            std::process::exit(1);
        }
    };

    info!("Running with config: {:#?}", config);

    if let (Some(fanout), Some(service), Some(rate)) = (
        config.fanout().sample(&mut rng),
        config.service().sample(&mut rng),
        config.rate().sample(&mut rng),
    ) {
        info!(
            "First request: fanout={}, dscp={}, rate={}Mbps",
            fanout.value, service.value, rate.value
        );
    }

    config.teardown();
}
