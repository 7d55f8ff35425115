use clap::Parser;
use icap_scan::error::IcapResult;
use icap_scan::{Error, ScanConfig, Session, ValidationResult, icap_config_error};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, error, info, warn};

const DEFAULT_PORT: u16 = 1344;

#[derive(Parser, Debug)]
#[command(
    name = "rs-icap-scan",
    about = "Submit files to an ICAP antivirus gateway",
    disable_version_flag = true,
    long_about = "Sends each file as an ICAP RESPMOD request and prints the gateway's verdict"
)]
struct Args {
    /// ICAP URI like icap://host[:port][/service]
    #[arg(short = 'u', long, default_value = "icap://127.0.0.1:1344")]
    uri: String,

    /// TOML configuration file (defaults apply when omitted)
    #[arg(short = 'c', long)]
    config: Option<PathBuf>,

    /// File to scan (repeatable)
    #[arg(short = 'f', long, required = true)]
    filename: Vec<PathBuf>,

    /// Name to validate and send instead of the file's own name (single file only)
    #[arg(long)]
    name: Option<String>,

    /// Only run the file policy, do not connect
    #[arg(
        long = "validate-only",
        action = clap::ArgAction::SetTrue,
        conflicts_with = "skip_validation"
    )]
    validate_only: bool,

    /// Send files even if they fail the file policy
    #[arg(long = "skip-validation", action = clap::ArgAction::SetTrue)]
    skip_validation: bool,

    /// Debug level 1..5 (error..trace)
    #[arg(short = 'd', long)]
    debug_level: Option<u8>,
}

/// Target parsed from `icap://host[:port][/service]`.
#[derive(Debug, PartialEq, Eq)]
struct Target {
    host: String,
    port: u16,
    service: Option<String>,
}

/// Why a single file did not get a verdict.
#[derive(Debug, thiserror::Error)]
enum Failure {
    #[error("cannot read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("rejected: {}", .0.message)]
    Rejected(ValidationResult),

    #[error(transparent)]
    Scan(#[from] Error),
}

fn main() -> ExitCode {
    let args = Args::parse();

    // logging
    let debug_level = args.debug_level.unwrap_or(0);
    if debug_level > 0 {
        tracing_subscriber::fmt()
            .with_max_level(match debug_level {
                1 => tracing::Level::ERROR,
                2 => tracing::Level::WARN,
                3 => tracing::Level::INFO,
                4 => tracing::Level::DEBUG,
                _ => tracing::Level::TRACE,
            })
            .init();
    }

    info!("Starting rs-icap-scan");
    debug!("Arguments: {:?}", args);

    match run(&args) {
        Ok(0) => ExitCode::SUCCESS,
        Ok(failed) => {
            warn!("{failed} of {} file(s) failed", args.filename.len());
            ExitCode::FAILURE
        }
        Err(e) => {
            error!("{e}");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Scan every file; returns how many failed.
fn run(args: &Args) -> IcapResult<usize> {
    if args.name.is_some() && args.filename.len() > 1 {
        return Err(Error::configuration("--name needs exactly one --filename"));
    }

    let target = parse_icap_uri(&args.uri)?;
    let mut config = match &args.config {
        Some(path) => ScanConfig::from_path(path)?,
        None => ScanConfig::default(),
    };
    if let Some(service) = &target.service {
        config = config.service(service);
    }
    config.check()?;
    debug!("Target: {:?}, config: {:?}", target, config);

    let mut failed = 0;
    for path in &args.filename {
        let name = args.name.clone().unwrap_or_else(|| display_name(path));
        if let Err(e) = scan_one(args, &target, &config, path, &name) {
            match &e {
                Failure::Rejected(_) => warn!("{}: {e}", path.display()),
                Failure::Read { .. } | Failure::Scan(_) => error!("{}: {e}", path.display()),
            }
            println!("{name}: {e}");
            failed += 1;
        }
    }
    Ok(failed)
}

fn scan_one(
    args: &Args,
    target: &Target,
    config: &ScanConfig,
    path: &Path,
    name: &str,
) -> Result<(), Failure> {
    let bytes = fs::read(path).map_err(|source| Failure::Read {
        path: path.to_path_buf(),
        source,
    })?;
    debug!("Read {}: {} bytes", path.display(), bytes.len());

    if !args.skip_validation {
        let check = icap_scan::validate(bytes.len() as u64, name, &config.policy);
        if !check.is_validated {
            return Err(Failure::Rejected(check));
        }
        if args.validate_only {
            println!("{name}: {}", check.message);
            return Ok(());
        }
    }

    info!(
        "Sending RESPMOD for {name} to {}:{}",
        target.host, target.port
    );
    let session = Session::open(&target.host, target.port, config.clone())?;
    let result = session.scan_and_close(&bytes, name)?;
    println!("{name}: {result}");
    Ok(())
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned())
}

fn parse_icap_uri(uri: &str) -> IcapResult<Target> {
    let rest = uri
        .strip_prefix("icap://")
        .ok_or_else(|| icap_config_error!("URI must start with icap://: {uri}"))?;
    let (authority, path) = match rest.find('/') {
        Some(slash) => (&rest[..slash], &rest[slash + 1..]),
        None => (rest, ""),
    };

    let (host, port) = if let Some(v6) = authority.strip_prefix('[') {
        let (host, after) = v6
            .split_once(']')
            .ok_or_else(|| icap_config_error!("unterminated IPv6 host in {uri}"))?;
        (host, after.strip_prefix(':'))
    } else {
        match authority.rsplit_once(':') {
            Some((h, p)) => (h, Some(p)),
            None => (authority, None),
        }
    };
    if host.is_empty() {
        return Err(icap_config_error!("missing host in {uri}"));
    }
    let port = match port {
        Some(p) => p
            .parse::<u16>()
            .map_err(|_| icap_config_error!("invalid port {p:?} in {uri}"))?,
        None => DEFAULT_PORT,
    };

    Ok(Target {
        host: host.to_string(),
        port,
        service: (!path.is_empty()).then(|| path.to_string()),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    #[test]
    fn uri_with_port_and_service() {
        let t = parse_icap_uri("icap://10.0.0.5:11344/avscan").unwrap();
        assert_eq!(
            t,
            Target {
                host: "10.0.0.5".into(),
                port: 11344,
                service: Some("avscan".into()),
            }
        );
    }

    #[test]
    fn uri_defaults_port() {
        let t = parse_icap_uri("icap://gateway.local").unwrap();
        assert_eq!(t.host, "gateway.local");
        assert_eq!(t.port, DEFAULT_PORT);
        assert_eq!(t.service, None);

        let t = parse_icap_uri("icap://gateway.local/").unwrap();
        assert_eq!(t.service, None);
    }

    #[test]
    fn uri_ipv6_host() {
        let t = parse_icap_uri("icap://[::1]:1345/scan").unwrap();
        assert_eq!(t.host, "::1");
        assert_eq!(t.port, 1345);

        let t = parse_icap_uri("icap://[fe80::1]").unwrap();
        assert_eq!(t.host, "fe80::1");
        assert_eq!(t.port, DEFAULT_PORT);
    }

    #[test]
    fn uri_rejects_bad_input() {
        for bad in [
            "http://host",
            "icap://",
            "icap://host:port",
            "icap://[::1",
            "icap://:1344",
        ] {
            let err = parse_icap_uri(bad).unwrap_err();
            assert!(matches!(err, Error::Configuration(_)), "{bad}: {err:?}");
        }
    }

    #[test]
    fn cli_parses_repeated_files() {
        let args = Args::parse_from([
            "rs-icap-scan",
            "-u",
            "icap://127.0.0.1",
            "-f",
            "a.pdf",
            "-f",
            "b.rtf",
            "-d",
            "4",
        ]);
        assert_eq!(
            args.filename,
            vec![PathBuf::from("a.pdf"), PathBuf::from("b.rtf")]
        );
        assert_eq!(args.debug_level, Some(4));
        assert!(!args.validate_only);
    }

    fn args(extra: &[&str]) -> Args {
        Args::parse_from(["rs-icap-scan"].iter().chain(extra))
    }

    fn local_target(port: u16) -> Target {
        Target {
            host: "127.0.0.1".into(),
            port,
            service: None,
        }
    }

    /// A local port with nothing listening on it.
    fn closed_port() -> u16 {
        let l = TcpListener::bind("127.0.0.1:0").expect("bind");
        l.local_addr().expect("addr").port()
    }

    fn write_file(dir: &tempfile::TempDir, name: &str, body: &[u8]) -> PathBuf {
        let path = dir.path().join(name);
        fs::write(&path, body).expect("write");
        path
    }

    #[test]
    fn unreadable_file_is_a_read_failure() {
        let path = PathBuf::from("/no/such/file.pdf");
        let a = args(&["-f", "/no/such/file.pdf"]);
        let target = local_target(closed_port());

        let err = scan_one(&a, &target, &ScanConfig::default(), &path, "file.pdf").unwrap_err();
        assert!(matches!(err, Failure::Read { ref path, .. } if path.ends_with("file.pdf")));
        assert!(err.to_string().starts_with("cannot read /no/such/file.pdf"));
    }

    #[test]
    fn policy_rejection_is_reported_with_its_result() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "x.exe", b"MZ");
        let a = args(&["-f", "x.exe"]);
        let target = local_target(closed_port());

        let err = scan_one(&a, &target, &ScanConfig::default(), &path, "x.exe").unwrap_err();
        let Failure::Rejected(check) = &err else {
            panic!("expected a policy rejection, got {err:?}");
        };
        assert!(!check.is_validated);
        assert_eq!(check.message, "Invalid filetype extension .exe in filename");
        assert_eq!(
            err.to_string(),
            "rejected: Invalid filetype extension .exe in filename"
        );
    }

    #[test]
    fn validate_only_never_connects() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "report.pdf", b"%PDF-1.4");
        let a = args(&["-f", "report.pdf", "--validate-only"]);
        let target = local_target(closed_port());

        scan_one(&a, &target, &ScanConfig::default(), &path, "report.pdf").expect("valid");
    }

    #[test]
    fn unreachable_gateway_is_a_scan_failure() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "report.pdf", b"%PDF-1.4");
        let a = args(&["-f", "report.pdf"]);
        let target = local_target(closed_port());

        let err = scan_one(&a, &target, &ScanConfig::default(), &path, "report.pdf").unwrap_err();
        let Failure::Scan(e) = &err else {
            panic!("expected a scan failure, got {err:?}");
        };
        assert!(e.is_connection(), "got {e:?}");
    }

    #[test]
    fn skip_validation_sends_rejected_names() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = write_file(&dir, "x.exe", b"MZ");
        let a = args(&["-f", "x.exe", "--skip-validation"]);
        let target = local_target(closed_port());

        let err = scan_one(&a, &target, &ScanConfig::default(), &path, "x.exe").unwrap_err();
        assert!(matches!(err, Failure::Scan(_)), "got {err:?}");
    }

    #[test]
    fn validate_only_conflicts_with_skip() {
        let res = Args::try_parse_from([
            "rs-icap-scan",
            "-f",
            "a.pdf",
            "--validate-only",
            "--skip-validation",
        ]);
        assert!(res.is_err());
    }
}
