use clap::{command, value_parser, Arg};
use erdp::ErrorDisplay;
use rfc4938d::config::Config;
use rfc4938d::msg::{CtlMessage, PadqParams};
use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::process::exit;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::time::timeout;

const DEFAULT_CONFIG: &str = "/etc/rfc4938.conf";
const SHOW_TIMEOUT: Duration = Duration::from_secs(2);

const USAGE: &str = "\
commands:
  show
  padq neighbor <id> max-data-rate <rate> <scale> cur-data-rate <rate> <scale>
       latency <ms> resources <0-100> rel-link-qual <0-100> [receive-only]
  padg neighbor <id> <credits>
  initiate { neighbor <id> | all } <scalar>
  terminate { neighbor <id> | all }";

fn main() {
    let args = command!()
        .override_usage("rfc4938ctl [-f FILE] <COMMAND>...")
        .after_help(USAGE)
        .arg(
            Arg::new("config")
                .short('f')
                .long("config")
                .help("Override the default config file path")
                .value_name("FILE")
                .value_parser(value_parser!(PathBuf)),
        )
        .arg(
            Arg::new("command")
                .help("Command words, e.g. 'padg neighbor 2 100'")
                .num_args(1..)
                .trailing_var_arg(true)
                .required(true),
        )
        .get_matches();

    let path = args
        .get_one::<PathBuf>("config")
        .cloned()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG));

    let config = match Config::load(&path) {
        Ok(v) => v,
        Err(e) => {
            eprintln!(
                "ERROR: problem opening config file {}: {}.",
                path.display(),
                e.display()
            );

            exit(-1);
        }
    };

    let words: Vec<&str> = args
        .get_many::<String>("command")
        .unwrap()
        .map(|s| s.as_str())
        .collect();

    let msg = match parse_command(&words, config.max_neighbors) {
        Ok(v) => v,
        Err(e) => {
            eprintln!("ERROR: {e}\n{USAGE}");

            exit(-1);
        }
    };

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .expect("runtime");

    if let Err(e) = runtime.block_on(submit(&config, msg)) {
        eprintln!("ERROR: {e}");

        exit(-1);
    }
}

/// Send the command to the daemon; for `show`, print the response records.
async fn submit(config: &Config, msg: CtlMessage) -> Result<(), String> {
    let want_show = matches!(msg, CtlMessage::CliSessionShow);
    let sock = UdpSocket::bind((Ipv4Addr::LOCALHOST, config.ctl_port))
        .await
        .map_err(|e| format!("unable to bind port {}: {}", config.ctl_port, e.display()))?;
    let daemon: SocketAddr = (Ipv4Addr::LOCALHOST, config.port).into();

    sock.send_to(&msg.encode(0), daemon)
        .await
        .map_err(|e| format!("unable to reach rfc4938 daemon: {}", e.display()))?;

    if !want_show {
        return Ok(());
    }

    let mut buf = vec![0u8; 4096];

    loop {
        let len = match timeout(SHOW_TIMEOUT, sock.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => len,
            Ok(Err(e)) => return Err(format!("recv failed: {}", e.display())),
            Err(_) => return Err("timed out waiting for show response".to_string()),
        };

        match CtlMessage::decode(&buf[..len]) {
            Ok((_, CtlMessage::CliSessionShowResponse { neighbor_id: 0, .. })) => return Ok(()),
            Ok((_, CtlMessage::CliSessionShowResponse { text, .. })) => println!("{text}"),
            Ok(_) | Err(_) => continue,
        }
    }
}

fn parse_command(words: &[&str], max_neighbors: u32) -> Result<CtlMessage, String> {
    let mut p = Words { words, at: 0 };

    let msg = match p.next()? {
        "show" => CtlMessage::CliSessionShow,
        "padg" => {
            let neighbor_id = p.neighbor(max_neighbors)?;
            let credits = p.bounded("credits", 0xFFFE)?;

            CtlMessage::CliSessionPadg {
                neighbor_id,
                credits,
            }
        }
        "padq" => {
            let neighbor_id = p.neighbor(max_neighbors)?;

            p.keyword("max-data-rate")?;

            let mdr = p.bounded("max-data-rate", 0xFFFF)?;
            let mdr_scale = p.bounded("max-data-rate scale", 3)?;

            p.keyword("cur-data-rate")?;

            let cdr = p.bounded("cur-data-rate", 0xFFFF)?;
            let cdr_scale = p.bounded("cur-data-rate scale", 3)?;

            p.keyword("latency")?;

            let latency = p.bounded("latency", 0xFFFF)?;

            p.keyword("resources")?;

            let resources = p.bounded("resources", 100)? as u8;

            p.keyword("rel-link-qual")?;

            let rlq = p.bounded("rel-link-qual", 100)? as u8;
            let receive_only = match p.try_next() {
                Some("receive-only") => 1,
                Some(other) => return Err(format!("unexpected trailing word '{other}'")),
                None => 0,
            };

            CtlMessage::CliSessionPadq {
                neighbor_id,
                padq: PadqParams {
                    receive_only,
                    rlq,
                    resources,
                    latency,
                    cdr_scale,
                    cdr,
                    mdr_scale,
                    mdr,
                },
            }
        }
        "initiate" => {
            let neighbor_id = p.neighbor_or_all(max_neighbors)?;
            let credit_scalar = p.bounded("scalar", 0xFFFE)?;

            CtlMessage::CliSessionInitiate {
                neighbor_id,
                credit_scalar,
            }
        }
        "terminate" => CtlMessage::CliSessionTerminate {
            neighbor_id: p.neighbor_or_all(max_neighbors)?,
        },
        other => return Err(format!("invalid command '{other}'")),
    };

    if let Some(extra) = p.try_next() {
        return Err(format!("unexpected trailing word '{extra}'"));
    }

    Ok(msg)
}

struct Words<'a> {
    words: &'a [&'a str],
    at: usize,
}

impl<'a> Words<'a> {
    fn next(&mut self) -> Result<&'a str, String> {
        self.try_next().ok_or_else(|| "missing argument".to_string())
    }

    fn try_next(&mut self) -> Option<&'a str> {
        let word = *self.words.get(self.at)?;

        self.at += 1;

        Some(word)
    }

    fn keyword(&mut self, word: &str) -> Result<(), String> {
        let got = self.next()?;

        if got == word {
            Ok(())
        } else {
            Err(format!("expected '{word}', got '{got}'"))
        }
    }

    fn bounded(&mut self, what: &str, max: u32) -> Result<u16, String> {
        let word = self.next()?;
        let value: u32 = word
            .parse()
            .map_err(|_| format!("invalid {what} '{word}'"))?;

        if value > max {
            return Err(format!("{what} must be <= {max}"));
        }

        Ok(value as u16)
    }

    fn neighbor(&mut self, max_neighbors: u32) -> Result<u32, String> {
        self.keyword("neighbor")?;

        let word = self.next()?;
        let id: u32 = word
            .parse()
            .map_err(|_| format!("invalid neighbor id '{word}'"))?;

        if id == 0 || id > max_neighbors {
            return Err(format!("neighbor id must be 1..{max_neighbors}"));
        }

        Ok(id)
    }

    /// `neighbor <id>` or the keyword `all`, encoded as neighbor id 0.
    fn neighbor_or_all(&mut self, max_neighbors: u32) -> Result<u32, String> {
        if self.words.get(self.at) == Some(&"all") {
            self.at += 1;

            return Ok(0);
        }

        self.neighbor(max_neighbors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn show_parsed() {
        assert_eq!(
            parse_command(&["show"], 256).unwrap(),
            CtlMessage::CliSessionShow
        );
    }

    #[test]
    fn padg_parsed() {
        assert_eq!(
            parse_command(&["padg", "neighbor", "2", "100"], 256).unwrap(),
            CtlMessage::CliSessionPadg {
                neighbor_id: 2,
                credits: 100
            }
        );
    }

    #[test]
    fn padq_parsed() {
        let words = [
            "padq",
            "neighbor",
            "20",
            "max-data-rate",
            "1000",
            "0",
            "cur-data-rate",
            "500",
            "0",
            "latency",
            "12",
            "resources",
            "100",
            "rel-link-qual",
            "40",
            "receive-only",
        ];

        assert_eq!(
            parse_command(&words, 256).unwrap(),
            CtlMessage::CliSessionPadq {
                neighbor_id: 20,
                padq: PadqParams {
                    receive_only: 1,
                    rlq: 40,
                    resources: 100,
                    latency: 12,
                    cdr_scale: 0,
                    cdr: 500,
                    mdr_scale: 0,
                    mdr: 1000,
                },
            }
        );
    }

    #[test]
    fn initiate_and_terminate_all() {
        assert_eq!(
            parse_command(&["initiate", "all", "64"], 256).unwrap(),
            CtlMessage::CliSessionInitiate {
                neighbor_id: 0,
                credit_scalar: 64
            }
        );
        assert_eq!(
            parse_command(&["terminate", "neighbor", "7"], 256).unwrap(),
            CtlMessage::CliSessionTerminate { neighbor_id: 7 }
        );
    }

    #[test]
    fn bounds_enforced() {
        assert!(parse_command(&["padg", "neighbor", "0", "1"], 256).is_err());
        assert!(parse_command(&["padg", "neighbor", "300", "1"], 256).is_err());
        assert!(parse_command(&["padg", "neighbor", "2", "65535"], 256).is_err());
        assert!(parse_command(&["initiate", "neighbor", "2", "65535"], 256).is_err());

        let mut words = vec![
            "padq",
            "neighbor",
            "20",
            "max-data-rate",
            "1000",
            "4",
        ];

        assert!(parse_command(&words, 256).is_err());

        words[5] = "3";

        // Still fails: the rest of the arguments are missing.
        assert!(parse_command(&words, 256).is_err());
    }

    #[test]
    fn trailing_words_rejected() {
        assert!(parse_command(&["show", "me"], 256).is_err());
        assert!(parse_command(&["terminate", "all", "now"], 256).is_err());
    }

    #[test]
    fn unknown_command_rejected() {
        assert!(parse_command(&["usage"], 256).is_err());
    }
}
