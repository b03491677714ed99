//! Command-line definition

use clap::{value_parser, Arg, ArgAction, Command};
use std::path::PathBuf;

pub(crate) fn build() -> Command {
    Command::new("passbook")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Anonymous ticket ledger and access-credential client")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .arg(
            Arg::new("config")
                .long("config")
                .short('c')
                .global(true)
                .value_parser(value_parser!(PathBuf))
                .help("Path to a TOML config file"),
        )
        .arg(
            Arg::new("session")
                .long("session")
                .global(true)
                .help("Session id that owns issued credentials"),
        )
        .arg(
            Arg::new("log-json")
                .long("log-json")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Emit logs as JSON"),
        )
        .subcommand(
            Command::new("redeem")
                .about("Mint tickets from a redemption code")
                .arg(Arg::new("code").required(true).help("24-character redemption code")),
        )
        .subcommand(
            Command::new("access")
                .about("Exchange a ticket for an access credential")
                .arg(
                    Arg::new("ticket")
                        .long("ticket")
                        .help("Ticket id to spend first (defaults to the oldest)"),
                )
                .arg(Arg::new("scope").long("scope").help("Scope to request"))
                .arg(
                    Arg::new("required")
                        .long("required")
                        .default_value("1")
                        .value_parser(value_parser!(u32))
                        .help("Tickets this access is expected to need"),
                ),
        )
        .subcommand(
            Command::new("renew").about("Replace the session's credential with a fresh one"),
        )
        .subcommand(
            Command::new("split")
                .about("Fold tickets into one shareable code")
                .arg(
                    Arg::new("count")
                        .required(true)
                        .value_parser(value_parser!(usize))
                        .help("Number of tickets to split"),
                ),
        )
        .subcommand(Command::new("status").about("Show ledger and credential status"))
        .subcommand(
            Command::new("export")
                .about("Export every ticket as JSON")
                .arg(
                    Arg::new("output")
                        .long("output")
                        .short('o')
                        .value_parser(value_parser!(PathBuf))
                        .help("Write to a file instead of stdout"),
                )
                .arg(
                    Arg::new("transfer")
                        .long("transfer")
                        .action(ArgAction::SetTrue)
                        .requires("output")
                        .help("Remove exported tickets once the file is written"),
                ),
        )
        .subcommand(
            Command::new("import")
                .about("Merge tickets from an export file")
                .arg(
                    Arg::new("file")
                        .required(true)
                        .value_parser(value_parser!(PathBuf))
                        .help("Export file to merge"),
                ),
        )
        .subcommand(Command::new("watch").about("Report credential expiry until interrupted"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn command_is_well_formed() {
        build().debug_assert();
    }

    #[test]
    fn global_flags_after_subcommand() {
        let matches = build()
            .try_get_matches_from(["passbook", "split", "3", "--session", "abc", "--log-json"])
            .unwrap();
        assert_eq!(matches.get_one::<String>("session").map(String::as_str), Some("abc"));
        assert!(matches.get_flag("log-json"));
        let (name, sub) = matches.subcommand().unwrap();
        assert_eq!(name, "split");
        assert_eq!(sub.get_one::<usize>("count"), Some(&3));
    }

    #[test]
    fn transfer_requires_output_file() {
        assert!(build()
            .try_get_matches_from(["passbook", "export", "--transfer"])
            .is_err());
        assert!(build()
            .try_get_matches_from(["passbook", "export", "--transfer", "-o", "out.json"])
            .is_ok());
    }

    #[test]
    fn split_count_must_be_numeric() {
        assert!(build()
            .try_get_matches_from(["passbook", "split", "many"])
            .is_err());
    }
}
