use xcache::cli;

fn main() -> anyhow::Result<()> {
    if let Err(e) = cli::run() {
        eprintln!("Error: {:?}", e);
        std::process::exit(1);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use xcache::cli::{Command, XcacheCli};

    #[test]
    fn compile_command_honors_request_count() {
        let cli = XcacheCli::parse_from([
            "xcache",
            "compile",
            "programs/add.json",
            "--requests",
            "8",
            "--max-entries",
            "4",
        ]);
        match cli.command() {
            Command::Compile {
                path,
                requests,
                max_entries,
                release,
            } => {
                assert_eq!(path.to_string_lossy(), "programs/add.json");
                assert_eq!(*requests, 8);
                assert_eq!(*max_entries, Some(4));
                assert!(!release);
            }
            other => panic!("expected compile command, got {other:?}"),
        }
    }
}
