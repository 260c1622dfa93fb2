use clap::Parser;
use log::LevelFilter;
use std::path::PathBuf;

use dualskill_core::{
    survey, transplant, CharacterStatus, FsStore, LogSink, TransplantConfig, TransplantError,
    TransplantJob,
};

#[derive(Debug, Parser)]
#[command(
    name = "dualskill",
    version,
    about = "Copy dual skill support from one character's BAC/BCM files to another's"
)]
struct Args {
    /// Code of the character WITHOUT dual skill support (gets patched).
    #[arg(long, required_unless_present = "scan")]
    dst: Option<String>,

    /// Code of the character that HAS dual skill support.
    #[arg(long, required_unless_present = "scan")]
    src: Option<String>,

    /// Directory holding the <CODE>_PLAYER.bac/.bcm files.
    #[arg(long, default_value = ".")]
    dir: PathBuf,

    /// JSON file overriding the designated entries and thresholds.
    #[arg(long, value_name = "JSON")]
    config: Option<PathBuf>,

    /// Validate and build the patched files without writing them.
    #[arg(long, default_value_t = false)]
    dry_run: bool,

    /// Refuse to patch when a BCM link would end up on the wrong entry.
    #[arg(long, default_value_t = false)]
    strict: bool,

    /// List which characters in --dir can donate or receive the feature.
    #[arg(long, default_value_t = false)]
    scan: bool,

    #[arg(long, default_value_t = false)]
    debug: bool,
}

fn setup_logger(debug: bool) -> Result<(), fern::InitError> {
    let level = if debug {
        LevelFilter::Debug
    } else {
        LevelFilter::Info
    };

    fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                chrono::Local::now().format("%H:%M:%S"),
                record.level(),
                message
            ))
        })
        .level(level)
        .chain(std::io::stderr())
        .apply()?;

    Ok(())
}

fn load_config(args: &Args) -> dualskill_core::Result<TransplantConfig> {
    let mut config = match &args.config {
        Some(path) => TransplantConfig::from_json_file(path)?,
        None => TransplantConfig::default(),
    };
    if args.strict {
        config.strict_references = true;
    }
    Ok(config)
}

fn run_scan(args: &Args, config: &TransplantConfig) -> dualskill_core::Result<()> {
    let reports = survey(&args.dir, config)?;
    if reports.is_empty() {
        println!("No *_PLAYER.bac files found in {}", args.dir.display());
        return Ok(());
    }

    for report in reports {
        let status = match &report.status {
            CharacterStatus::Donor => "has dual skill support".to_string(),
            CharacterStatus::Recipient => "can receive dual skill support".to_string(),
            CharacterStatus::Unusable(reason) => format!("unusable ({})", reason),
        };
        println!("{:<8} {}", report.files.code, status);
    }
    Ok(())
}

fn run_transplant(args: &Args, config: &TransplantConfig) -> dualskill_core::Result<()> {
    let (Some(src), Some(dst)) = (&args.src, &args.dst) else {
        return Err(TransplantError::Config(
            "--src and --dst are required unless --scan is used".to_string(),
        ));
    };

    let mut job = TransplantJob::new(&args.dir, src, dst);
    job.dry_run = args.dry_run;

    let summary = transplant(&FsStore, config, &job, &mut LogSink)?;

    println!(
        "BAC: {} entries copied ({} total)",
        summary.copied_bac_entries, summary.bac_entries
    );
    println!(
        "BCM: {} -> {} entries",
        summary.bcm_entries_before, summary.bcm_entries_after
    );
    if args.dry_run {
        println!("\nDry run: nothing was written.");
        return Ok(());
    }
    for path in &summary.written {
        println!("Wrote {}", path.display());
    }

    println!("\nOperation completed with success");
    println!(
        "Remember that the char must have a bdm assigned too in the cms \
         (one of a char with dual skill support) or the kick will always miss!"
    );
    Ok(())
}

fn main() {
    let args = Args::parse();

    if let Err(err) = setup_logger(args.debug) {
        eprintln!("Failed to initialise logging: {err}");
    }

    let result = load_config(&args).and_then(|config| {
        if args.scan {
            run_scan(&args, &config)
        } else {
            run_transplant(&args, &config)
        }
    });

    if let Err(err) = result {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}
