//! Command-line PDF signing with a smart card.

use std::path::PathBuf;
use std::process::ExitCode;

use clap::Parser;

use cardsign::orchestrator::{sign_document, SignConfig, StampOptions};
use cardsign::pdf::IncrementalUpdateBackend;
use cardsign::signing::DigestAlgorithm;

#[derive(Parser, Debug)]
#[command(name = "cardsign")]
#[command(about = "Sign a PDF with a smart card over PKCS#11", version)]
struct Cli {
    /// Path to the PDF file
    #[arg(value_name = "PDF")]
    pdf: PathBuf,

    /// The card PIN. Default: ask for the PIN
    #[arg(long)]
    pin: Option<String>,

    /// The page to add a visible signature stamp, counted from 1.
    /// Default: 0 (no stamp)
    #[arg(long, value_name = "N", default_value_t = 0)]
    stamp_page: usize,

    /// The X,Y coordinates of the stamp, relative to the bottom-left corner
    #[arg(long, value_name = "X,Y", value_parser = parse_pair, default_value = "200,20")]
    stamp_pos: (f64, f64),

    /// The width and height of the stamp
    #[arg(long, value_name = "W,H", value_parser = parse_pair, default_value = "270,60")]
    stamp_size: (f64, f64),

    /// The text of the stamp. Default: signer's name and date
    #[arg(long, value_name = "TEXT")]
    stamp_text: Option<String>,

    /// The path of the signed PDF. Default: input file with -signed suffix
    #[arg(long, value_name = "FILE")]
    out_file: Option<PathBuf>,

    /// URL of the timestamp server (empty: no timestamp)
    #[arg(long, value_name = "URL", default_value = "http://qts.harica.gr/")]
    tsa: String,

    /// Driver (.so/.dll file) of the card reader
    #[arg(long, value_name = "FILE", default_value = "libgclib.so")]
    card_reader: PathBuf,

    /// Digest algorithm
    #[arg(long, value_name = "ALG", default_value = "sha256")]
    digest: DigestAlgorithm,

    /// Reason for signing, recorded in the signature dictionary
    #[arg(long, default_value = "")]
    reason: String,

    /// Signing location, recorded in the signature dictionary
    #[arg(long, default_value = "")]
    location: String,

    /// Contact information, recorded in the signature dictionary
    #[arg(long, default_value = "")]
    contact: String,
}

fn parse_pair(value: &str) -> Result<(f64, f64), String> {
    let parts: Vec<&str> = value.split(',').collect();
    if parts.len() != 2 {
        return Err(format!("{} is not of the form X,Y", value));
    }
    let x = parts[0].trim().parse().map_err(|_| format!("{} is not a number", parts[0]))?;
    let y = parts[1].trim().parse().map_err(|_| format!("{} is not a number", parts[1]))?;
    Ok((x, y))
}

fn main() -> ExitCode {
    env_logger::init();
    let cli = Cli::parse();

    let pin = match cli.pin {
        Some(pin) => pin,
        None => match rpassword::prompt_password("Enter your PIN: ") {
            Ok(pin) => pin,
            Err(e) => {
                eprintln!("cannot read PIN: {}", e);
                return ExitCode::FAILURE;
            },
        },
    };

    let config = SignConfig {
        input: cli.pdf,
        output: cli.out_file,
        driver: cli.card_reader,
        pin,
        digest: cli.digest,
        tsa_url: (!cli.tsa.is_empty()).then_some(cli.tsa),
        stamp: StampOptions {
            page: cli.stamp_page,
            position: cli.stamp_pos,
            size: cli.stamp_size,
            text: cli.stamp_text,
        },
        contact: cli.contact,
        location: cli.location,
        reason: cli.reason,
    };

    match sign_document(&config, &IncrementalUpdateBackend::default()) {
        Ok(output) => {
            println!("signed pdf written to {}", output.display());
            ExitCode::SUCCESS
        },
        Err(e) => {
            eprintln!("{}", e);
            ExitCode::FAILURE
        },
    }
}
