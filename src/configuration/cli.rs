use clap::{Args, Parser, Subcommand};

/// Command-line surface of the `logifai` binary.
///
/// Running without a subcommand captures stdin when it is piped, so
/// `npm run dev 2>&1 | logifai` works with no extra arguments.
#[derive(Parser, Debug, Clone, PartialEq)]
#[command(name = "logifai", version, about = "Capture, redact and browse dev-loop logs")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,

    /// Options used when no subcommand is given.
    #[command(flatten)]
    pub capture: CaptureArgs,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum Command {
    /// Record stdin into a new session.
    Capture(CaptureArgs),
    /// Serve the dashboard and HTTP API.
    View {
        /// Port to listen on; defaults to the settings file value.
        #[arg(long, env = "LOGIFAI_PORT")]
        port: Option<u16>,
    },
    /// Print the entries a `logifai://` reference points to, as NDJSON.
    Show {
        #[arg(value_name = "REF")]
        reference: String,
    },
    /// List stored sessions, newest first.
    Sessions,
    /// Delete old sessions.
    Cleanup(CleanupArgs),
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CaptureArgs {
    /// Label stored in every entry's `source` field.
    #[arg(long, default_value = "unknown")]
    pub source: String,

    /// Project label; defaults to the current directory.
    #[arg(long)]
    pub project: Option<String>,

    /// Do not echo input to stdout.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub no_passthrough: bool,

    /// Serve the dashboard and stream entries while capturing.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub live: bool,

    /// Port for `--live`; defaults to the settings file value.
    #[arg(long, env = "LOGIFAI_PORT")]
    pub port: Option<u16>,
}

#[derive(Args, Debug, Clone, PartialEq)]
pub struct CleanupArgs {
    /// Delete sessions older than this, e.g. `30d`.
    #[arg(long)]
    pub older_than: Option<String>,

    /// Keep total size under this, e.g. `500M` or `1G`.
    #[arg(long)]
    pub max_size: Option<String>,

    /// Report what would be deleted without deleting.
    #[arg(long, action = clap::ArgAction::SetTrue)]
    pub dry_run: bool,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_arguments_means_default_capture() {
        let cli = Cli::try_parse_from(["logifai"]).unwrap();
        assert_eq!(cli.command, None);
        assert_eq!(cli.capture.source, "unknown");
        assert!(!cli.capture.no_passthrough);
        assert!(!cli.capture.live);
    }

    #[test]
    fn capture_subcommand_flags() {
        let cli = Cli::try_parse_from([
            "logifai", "capture", "--source", "dev", "--project", "/app", "--no-passthrough", "--live",
            "--port", "4000",
        ])
        .unwrap();
        let Some(Command::Capture(args)) = cli.command else {
            panic!("expected capture");
        };
        assert_eq!(args.source, "dev");
        assert_eq!(args.project.as_deref(), Some("/app"));
        assert!(args.no_passthrough);
        assert!(args.live);
        assert_eq!(args.port, Some(4000));
    }

    #[test]
    fn show_and_cleanup_subcommands() {
        let cli = Cli::try_parse_from(["logifai", "show", "logifai://abcdef01:1-3"]).unwrap();
        assert_eq!(cli.command, Some(Command::Show { reference: "logifai://abcdef01:1-3".into() }));

        let cli = Cli::try_parse_from(["logifai", "cleanup", "--older-than", "7d", "--max-size", "1G", "--dry-run"])
            .unwrap();
        assert_eq!(
            cli.command,
            Some(Command::Cleanup(CleanupArgs {
                older_than: Some("7d".into()),
                max_size: Some("1G".into()),
                dry_run: true,
            }))
        );
    }

    #[test]
    fn rejects_bad_port() {
        assert!(Cli::try_parse_from(["logifai", "view", "--port", "99999"]).is_err());
        assert!(Cli::try_parse_from(["logifai", "show"]).is_err());
    }
}
