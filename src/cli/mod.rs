mod dispatch;
mod types;

pub use dispatch::dispatch;
pub use types::Cli;

#[cfg(test)]
mod tests {
    use super::types::{Commands, TraceCommands};
    use super::Cli;
    use clap::{CommandFactory, Parser};
    use rankfork::config::Mode;
    use std::time::Duration;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_parses_program_after_separator() {
        let cli = Cli::try_parse_from([
            "rankfork", "run", "-n", "4", "--mode", "trace-only", "--timeout", "1.5", "--",
            "./ring", "--laps", "3",
        ])
        .unwrap();
        match cli.command {
            Commands::Run {
                ranks,
                mode,
                timeout,
                program,
                ..
            } => {
                assert_eq!(ranks, 4);
                assert_eq!(mode, Some(Mode::TraceOnly));
                assert_eq!(timeout, Some(Duration::from_millis(1500)));
                assert_eq!(program, vec!["./ring", "--laps", "3"]);
            }
            _ => panic!("expected run"),
        }
    }

    #[test]
    fn test_run_rejects_zero_ranks() {
        assert!(Cli::try_parse_from(["rankfork", "run", "-n", "0", "--", "true"]).is_err());
    }

    #[test]
    fn test_run_requires_program() {
        assert!(Cli::try_parse_from(["rankfork", "run", "-n", "2"]).is_err());
    }

    #[test]
    fn test_trace_rollback_args() {
        let cli = Cli::try_parse_from([
            "rankfork", "trace", "rollback", "--dir", "/tmp/t", "--rank", "1", "--seq", "7",
        ])
        .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Trace {
                command: TraceCommands::Rollback { rank: 1, seq: 7, .. }
            }
        ));
    }
}
