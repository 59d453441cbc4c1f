use std::env;
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use brujula::exporter::DEFAULT_MISSING_MARKER;
use brujula::heading::display_heading;
use brujula::session_loader::load_export;

struct InspectOptions {
    rows: usize,
    missing_marker: String,
}

fn parse_args() -> Result<(PathBuf, InspectOptions)> {
    let usage = "Uso: inspect_export [--rows N] [--missing MARCADOR] <archivo.csv>";
    let mut rows = 0usize;
    let mut missing_marker = DEFAULT_MISSING_MARKER.to_string();
    let mut csv_path: Option<PathBuf> = None;

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--rows" => {
                let value = args.next().ok_or_else(|| anyhow!("{}", usage))?;
                rows = value
                    .parse()
                    .with_context(|| format!("--rows inválido: {}", value))?;
            }
            "--missing" => {
                missing_marker = args.next().ok_or_else(|| anyhow!("{}", usage))?;
            }
            _ => {
                if csv_path.is_some() {
                    bail!("{}", usage);
                }
                csv_path = Some(PathBuf::from(arg));
            }
        }
    }

    let csv_path = csv_path.ok_or_else(|| anyhow!("Debes especificar un archivo CSV"))?;
    Ok((
        csv_path,
        InspectOptions {
            rows,
            missing_marker,
        },
    ))
}

fn show(value: Option<f64>) -> String {
    value.map(|v| format!("{:>9.4}", v)).unwrap_or_else(|| format!("{:>9}", "—"))
}

fn main() -> Result<()> {
    env_logger::init();
    let (csv_path, opts) = parse_args()?;
    println!("🔎 Inspeccionando sesión {:?}", csv_path);

    let session = load_export(&csv_path, &opts.missing_marker)
        .with_context(|| format!("No se pudo leer {:?}", csv_path))?;

    let Some(summary) = session.summary() else {
        println!("ℹ️  El archivo no contiene filas");
        return Ok(());
    };

    println!("\n📄 Filas: {}", summary.rows);
    println!(
        "🕳️  Sin acelerómetro: {}  Sin giroscopio: {}",
        summary.missing_accelerometer, summary.missing_gyroscope
    );
    println!(
        "🧭 Rumbo min {}  media {}  max {}",
        display_heading(summary.heading_min),
        display_heading(summary.heading_mean),
        display_heading(summary.heading_max)
    );

    if opts.rows > 0 {
        println!("\nPrimeras {} filas (mag x/y/z, rumbo, accel z, gyro z):", opts.rows);
        for (idx, row) in session.rows.iter().take(opts.rows).enumerate() {
            println!(
                "  {:>4}: {:>9.4} {:>9.4} {:>9.4} {:>9} {} {}",
                idx,
                row.magnetometer.x,
                row.magnetometer.y,
                row.magnetometer.z,
                display_heading(row.heading),
                show(row.accelerometer.map(|r| r.z)),
                show(row.gyroscope.map(|r| r.z))
            );
        }
    }

    Ok(())
}
