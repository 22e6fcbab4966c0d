use clap::{App, Arg};
use df1::logging;
use std::path::Path;
use std::process;

mod config;
mod service;
mod signals;
mod tty;

use crate::config::Config;
use crate::service::Service;

const LOG_FILE: &str = "df1d.log";

pub fn main() {
    let matches = App::new("df1d")
        .version(env!("CARGO_PKG_VERSION"))
        .version_short("v")
        .about("Shares DF1 serial lines between PCCC clients over TCP.")
        .arg(Arg::with_name("debug").short("d").help("Enable debug logging"))
        .arg(
            Arg::with_name("foreground")
                .short("f")
                .help("Run in the foreground, logging to stderr"),
        )
        .arg(
            Arg::with_name("CONFIG_FILE")
                .help("Path to the config file")
                .required(true),
        )
        .get_matches();

    let debug = matches.is_present("debug");
    let foreground = matches.is_present("foreground");
    let config_path = matches.value_of("CONFIG_FILE").unwrap();

    let log = match foreground {
        true => logging::terminal(debug),
        false => logging::file(LOG_FILE, debug),
    };

    let config = match Config::load(config_path) {
        Ok(config) => config,
        Err(err) => {
            logging::crit!(log, "error loading configuration"; "path" => config_path, "error" => %err);
            process::exit(1);
        }
    };

    if let Err(err) = signals::install() {
        logging::crit!(log, "error installing signal handlers"; "error" => %err);
        process::exit(1);
    }

    logging::info!(log, "starting df1d";
                   "version" => env!("CARGO_PKG_VERSION"),
                   "config" => config_path);

    let mut service = match Service::new(&log) {
        Ok(service) => service,
        Err(err) => {
            logging::crit!(log, "error creating service"; "error" => %err);
            process::exit(1);
        }
    };

    let count = service.configure(&config);
    logging::info!(log, "connections configured"; "count" => count);

    if let Err(err) = service.run(Path::new(config_path)) {
        logging::crit!(log, "event loop failed"; "error" => %err);
    }

    logging::info!(log, "df1d stopped");
}
