// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, Result};
use clap::{Parser, ValueEnum};
use fl::config::Config;
use fl::types::{host_id_to_address, Dpid};
use fl_common::log::{
    init_file_logger, init_logger_with_format, LogFormat,
};
use fl_sim::Lab;
use slog::info;
use std::path::PathBuf;

/// Run the fault localizing controller against a simulated line of
/// switches, break some links and trace a path across them.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None, styles = get_styles())]
struct Cli {
    /// Number of switches in the line. Host `hN` hangs off switch `sN`.
    #[arg(long, default_value_t = 3)]
    switches: u64,

    /// Host the trace starts from.
    #[arg(long, default_value = "h1")]
    src: String,

    /// Host the trace ends at. Defaults to the host on the last switch.
    #[arg(long)]
    dst: Option<String>,

    /// Link to break after rules are in place, as `a-b` switch numbers.
    /// May be given more than once.
    #[arg(long, value_parser = parse_link)]
    fail_link: Vec<(Dpid, Dpid)>,

    /// Controller configuration file (JSON).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Override the probe deadline, e.g. `250ms`.
    #[arg(long)]
    probe_timeout: Option<humantime::Duration>,

    /// Override the delay between installing a tap and probing.
    #[arg(long)]
    send_delay: Option<humantime::Duration>,

    /// How long to wait for hosts to be learned.
    #[arg(long, default_value = "5s")]
    establish_timeout: humantime::Duration,

    /// How long to wait for the trace report.
    #[arg(long, default_value = "2m")]
    report_timeout: humantime::Duration,

    #[arg(long, value_enum, default_value_t = Format::Term)]
    log_format: Format,

    /// Write bunyan logs to this file instead of the terminal.
    #[arg(long)]
    log_file: Option<String>,
}

#[derive(Debug, Copy, Clone, PartialEq, Eq, ValueEnum)]
enum Format {
    Json,
    Term,
}

impl From<Format> for LogFormat {
    fn from(f: Format) -> Self {
        match f {
            Format::Json => LogFormat::Json,
            Format::Term => LogFormat::Term,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let log = match &cli.log_file {
        Some(path) => init_file_logger(path),
        None => init_logger_with_format(cli.log_format.into()),
    };

    let mut config = match &cli.config {
        Some(path) => Config::from_file(path)?,
        None => Config::default(),
    };
    if let Some(d) = cli.probe_timeout {
        config.probe_timeout_ms = millis(d);
    }
    if let Some(d) = cli.send_delay {
        config.probe_send_delay_ms = millis(d);
    }

    let dst = cli
        .dst
        .clone()
        .unwrap_or_else(|| format!("{}{}", config.host_prefix, cli.switches));
    let src_host = host_id_to_address(&cli.src, &config.host_prefix)?;
    let dst_host = host_id_to_address(&dst, &config.host_prefix)?;

    let lab = Lab::linear(cli.switches, config, log.clone())?;
    lab.establish(
        src_host.to_u64(),
        dst_host.to_u64(),
        cli.establish_timeout.into(),
    )?;

    for (a, b) in &cli.fail_link {
        lab.net.fail_link(*a, *b);
    }

    let path = lab.trace(&cli.src, &dst)?;
    info!(log, "trace started"; "path" => format!("{path}"));

    let report = lab.next_report(cli.report_timeout.into()).ok_or_else(|| {
        anyhow!("no trace report within {}", cli.report_timeout)
    })?;

    println!("{}", serde_json::to_string_pretty(&report)?);
    println!("{report}");
    Ok(())
}

fn millis(d: humantime::Duration) -> u64 {
    let d: std::time::Duration = d.into();
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}

fn parse_link(s: &str) -> Result<(Dpid, Dpid)> {
    let (a, b) = s
        .split_once('-')
        .ok_or_else(|| anyhow!("expected a-b, got {s}"))?;
    Ok((Dpid(a.trim().parse()?), Dpid(b.trim().parse()?)))
}

/// Colored help output.
fn get_styles() -> clap::builder::Styles {
    clap::builder::Styles::styled()
        .header(anstyle::Style::new().bold().underline().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(245, 207, 101)),
        )))
        .literal(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(72, 213, 151)),
        )))
        .invalid(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(72, 213, 151)),
        )))
        .valid(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(72, 213, 151)),
        )))
        .usage(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(245, 207, 101)),
        )))
        .error(anstyle::Style::new().bold().fg_color(Some(
            anstyle::Color::Rgb(anstyle::RgbColor(232, 104, 134)),
        )))
}
