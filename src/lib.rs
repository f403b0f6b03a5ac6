/**
 * @file
 * @brief Library root: module graph, command-line configuration of the
 * executive binary, and the entry point that wires a fresh executive to
 * its TCP server.
 */
pub mod agent;
pub mod constants;
pub mod directory;
pub mod errors;
pub mod executive;
pub mod federate;
pub mod federation;
pub mod federation_time;
pub mod lbts;
pub mod message;
pub mod queues;
pub mod server;
pub mod snapshot;
pub mod stats;
pub mod time_management;
pub mod wire;

use std::error::Error;

use tracing::info;

use crate::constants::DEFAULT_PORT;

pub use crate::agent::FederationAgent;
pub use crate::errors::{ExceptionKind, FederationError};
pub use crate::executive::Executive;
pub use crate::federation_time::{LogicalTime, Lookahead};
pub use crate::message::{FederateHandle, FederationHandle, Message, MessageKind};
pub use crate::server::Server;
pub use crate::time_management::TimeManager;

////////////////  Type definitions

/// Runtime options of the executive binary.
pub struct Config {
    port: u16,
    federation_name: Option<String>,
    model_path: Option<String>,
    verbose: u8,
}

////////////////  Functions

impl Config {
    pub fn build(args: &[String]) -> Result<Config, &'static str> {
        let mut config = Config {
            port: DEFAULT_PORT,
            federation_name: None,
            model_path: None,
            verbose: 0,
        };
        process_args(&mut config, args)?;
        Ok(config)
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    pub fn federation_name(&self) -> Option<&str> {
        self.federation_name.as_deref()
    }

    pub fn model_path(&self) -> Option<&str> {
        self.model_path.as_deref()
    }

    pub fn verbose(&self) -> u8 {
        self.verbose
    }
}

fn process_args(config: &mut Config, argv: &[String]) -> Result<(), &'static str> {
    let mut idx = 1;
    let argc = argv.len();
    while idx < argc {
        let arg = argv[idx].as_str();
        if arg == "-i" || arg == "--id" {
            if argc < idx + 2 {
                println!("--id needs a string argument.");
                usage(argc, argv);
                return Err("Fail to handle id option");
            }
            idx += 1;
            config.federation_name = Some(argv[idx].clone());
        } else if arg == "-m" || arg == "--model" {
            if argc < idx + 2 {
                println!("--model needs a file path argument.");
                usage(argc, argv);
                return Err("Fail to handle model option");
            }
            idx += 1;
            config.model_path = Some(argv[idx].clone());
        } else if arg == "-p" || arg == "--port" {
            if argc < idx + 2 {
                println!(
                    "--port needs a short unsigned integer argument ( > 0 and < {}).",
                    u16::MAX
                );
                usage(argc, argv);
                return Err("Fail to handle port option");
            }
            idx += 1;
            match argv[idx].parse::<u16>() {
                Ok(parsed_value) => {
                    if parsed_value == 0 || parsed_value == u16::MAX {
                        println!(
                            "--port needs a short unsigned integer argument ( > 0 and < {}).",
                            u16::MAX
                        );
                        usage(argc, argv);
                        return Err("Fail to handle port option");
                    }
                    config.port = parsed_value;
                }
                Err(_e) => {
                    return Err("Fail to parse a string to u16");
                }
            }
        } else if arg == "-v" || arg == "--verbose" {
            config.verbose += 1;
        } else {
            println!("Unrecognized command-line argument: {}", arg);
            usage(argc, argv);
            return Err("Invalid argument");
        }
        idx += 1;
    }
    if config.federation_name.is_some() != config.model_path.is_some() {
        println!("--id and --model must be given together.");
        usage(argc, argv);
        return Err("Incomplete federation option");
    }
    Ok(())
}

fn usage(argc: usize, argv: &[String]) {
    println!("\nCommand-line arguments: ");
    println!("  -i, --id <name>");
    println!("   The name of a federation to create before the first federate joins.");
    println!("   Requires --model.");
    println!("  -m, --model <path>");
    println!("   The model file of the federation named by --id.");
    println!("  -p, --port <n>");
    println!("   The port number to use for the executive. Must be larger than 0 and smaller than {}. Default is {}.", u16::MAX, DEFAULT_PORT);
    println!("  -v, --verbose");
    println!("   Raise the log level. Repeat once more for trace output.");

    println!("Command given:");
    let mut idx = 0;
    while idx < argc {
        println!("{} ", argv[idx]);
        idx += 1;
    }
}

pub fn start_executive(config: &Config) -> Result<Server, Box<dyn Error>> {
    Ok(Server::create_server(config.port().to_string()))
}

/**
 * Run the federation executive until its listener fails.
 *
 * A federation named on the command line is created up front; everything
 * else is driven by the messages federates send over TCP.
 */
pub fn run(config: Config) -> Result<(), Box<dyn Error>> {
    let mut executive = Executive::new();
    if let (Some(name), Some(model_path)) = (config.federation_name(), config.model_path()) {
        let handle = executive
            .directory_mut()
            .create_federation(name, model_path)?;
        info!("federation {} created as {} before the first join", name, handle);
    }
    let server = start_executive(&config)?;
    server.serve(executive)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn args(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_build_defaults_positive() {
        let config = Config::build(&args(&["fedtime"])).unwrap();
        assert_eq!(config.port(), DEFAULT_PORT);
        assert!(config.federation_name().is_none());
        assert!(config.model_path().is_none());
        assert_eq!(config.verbose(), 0);
    }

    #[test]
    fn test_build_every_option_positive() {
        let config = Config::build(&args(&[
            "fedtime", "-i", "demo", "-m", "demo.fed", "-p", "61000", "-v", "--verbose",
        ]))
        .unwrap();
        assert_eq!(config.port(), 61000);
        assert_eq!(config.federation_name(), Some("demo"));
        assert_eq!(config.model_path(), Some("demo.fed"));
        assert_eq!(config.verbose(), 2);
    }

    #[test]
    fn test_build_port_zero_negative() {
        assert!(Config::build(&args(&["fedtime", "--port", "0"])).is_err());
    }

    #[test]
    fn test_build_port_not_numeric_negative() {
        assert!(Config::build(&args(&["fedtime", "--port", "high"])).is_err());
    }

    #[test]
    fn test_build_trailing_option_negative() {
        assert!(Config::build(&args(&["fedtime", "--id"])).is_err());
    }

    #[test]
    fn test_build_unknown_option_negative() {
        assert!(Config::build(&args(&["fedtime", "--frobnicate"])).is_err());
    }

    #[test]
    fn test_build_incomplete_federation_negative() {
        assert!(Config::build(&args(&["fedtime", "--id", "demo"])).is_err());
        assert!(Config::build(&args(&["fedtime", "--model", "demo.fed"])).is_err());
    }
}
