/*
Brújula - captura sincronizada de acelerómetro, magnetómetro y giroscopio

Sistema que:
1. Suscribe los tres canales de sensor a la misma frecuencia
2. Acumula cada flujo en su propio buffer mientras se graba
3. Calcula el rumbo a partir de los ejes x/y del magnetómetro
4. Exporta la sesión alineada por índice a un CSV

Para compilar y ejecutar:
    RUST_LOG=info ./target/release/brujula --out sesiones --rate normal

Comandos por stdin: start, stop, toggle, rate <fast|normal|slow|ms>,
clear, export, status, quit
*/

use std::env;
use std::io::BufRead;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{anyhow, bail, Context, Result};
use crossbeam_channel::{select, tick, unbounded};

use brujula::channel::SimulatedChannel;
use brujula::config::RecorderConfig;
use brujula::controller::{ChannelSet, SamplingController};
use brujula::exporter::SessionExporter;
use brujula::heading::{display_heading, heading};
use brujula::platform;
use brujula::storage::LocalDirectory;
use brujula::types::{parse_rate, RatePreset};
use brujula::{ChannelKind, RecorderError, RecordingState, SamplingRate};

struct CliOptions {
    config: Option<PathBuf>,
    out_dir: Option<PathBuf>,
    rate: Option<SamplingRate>,
}

fn parse_args() -> Result<CliOptions> {
    let mut opts = CliOptions {
        config: None,
        out_dir: None,
        rate: None,
    };
    let usage = "Uso: brujula [--config FICHERO] [--out DIRECTORIO] [--rate fast|normal|slow|<ms>]";

    let mut args = env::args().skip(1);
    while let Some(arg) = args.next() {
        match arg.as_str() {
            "--config" => {
                let value = args.next().ok_or_else(|| anyhow!("{}", usage))?;
                opts.config = Some(PathBuf::from(value));
            }
            "--out" => {
                let value = args.next().ok_or_else(|| anyhow!("{}", usage))?;
                opts.out_dir = Some(PathBuf::from(value));
            }
            "--rate" => {
                let value = args.next().ok_or_else(|| anyhow!("{}", usage))?;
                opts.rate = Some(parse_rate(&value).with_context(|| format!("--rate {}", value))?);
            }
            "-h" | "--help" => {
                println!("{}", usage);
                std::process::exit(0);
            }
            other => bail!("Argumento desconocido {:?}\n{}", other, usage),
        }
    }
    Ok(opts)
}

/// Comandos del usuario
#[derive(Debug)]
enum Command {
    Start,
    Stop,
    Toggle,
    Rate(SamplingRate),
    Clear,
    Export,
    Status,
    Quit,
}

fn parse_command(line: &str) -> Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(word) = parts.next() else {
        return Err(String::new());
    };
    match word.to_ascii_lowercase().as_str() {
        "start" => Ok(Command::Start),
        "stop" => Ok(Command::Stop),
        "toggle" | "t" => Ok(Command::Toggle),
        "rate" => {
            let value = parts
                .next()
                .ok_or_else(|| "rate necesita fast|normal|slow|<ms>".to_string())?;
            parse_rate(value)
                .map(Command::Rate)
                .map_err(|e| e.to_string())
        }
        "clear" | "delete" => Ok(Command::Clear),
        "export" | "save" => Ok(Command::Export),
        "status" | "s" => Ok(Command::Status),
        "quit" | "q" | "exit" => Ok(Command::Quit),
        other => Err(format!("Comando desconocido: {}", other)),
    }
}

fn print_status(controller: &SamplingController) {
    let state = controller.state();
    let [acc, mag, gyro] = controller.buffer_lengths();
    println!(
        "📊 {} | {} | buffers accel={} mag={} gyro={}",
        state,
        controller.rate(),
        acc,
        mag,
        gyro
    );
    for kind in ChannelKind::ALL {
        if let Some(r) = controller.latest(kind) {
            if kind == ChannelKind::Magnetometer {
                println!(
                    "   {:<13} x: {:>9.4} y: {:>9.4} z: {:>9.4} heading: {}",
                    kind.label(),
                    r.x,
                    r.y,
                    r.z,
                    display_heading(heading(r.x, r.y))
                );
            } else {
                println!(
                    "   {:<13} x: {:>9.4} y: {:>9.4} z: {:>9.4}",
                    kind.label(),
                    r.x,
                    r.y,
                    r.z
                );
            }
        }
    }
}

fn report_error(action: &str, err: &RecorderError) {
    match err {
        RecorderError::AlreadyRecording | RecorderError::NotRecording => {
            println!("⚠️  {}: {}", action, err);
        }
        _ => eprintln!("❌ {}: {}", action, err),
    }
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    println!("🧭 Brújula - acelerómetro + magnetómetro + giroscopio\n");

    // Sin plataforma soportada no se construye nada
    let host = match platform::ensure_current() {
        Ok(host) => host,
        Err(e) => {
            eprintln!("❌ {}", e);
            bail!("plataforma no soportada");
        }
    };

    let opts = parse_args()?;
    let mut config = match &opts.config {
        Some(path) => RecorderConfig::load(path)
            .with_context(|| format!("No se pudo cargar la configuración {:?}", path))?,
        None => RecorderConfig::default(),
    };
    if let Some(dir) = opts.out_dir {
        config.export_dir = dir;
    }
    let rate = match opts.rate {
        Some(rate) => rate,
        None => config.sampling_rate()?,
    };

    let channels = ChannelSet::new(
        Box::new(SimulatedChannel::with_defaults(
            ChannelKind::Accelerometer,
            config.simulated_noise,
        )),
        Box::new(SimulatedChannel::with_defaults(
            ChannelKind::Magnetometer,
            config.simulated_noise,
        )),
        Box::new(SimulatedChannel::with_defaults(
            ChannelKind::Gyroscope,
            config.simulated_noise,
        )),
    )?;
    let controller = SamplingController::new(host, channels, rate);
    let exporter = SessionExporter::new(config.export_options());
    let storage = if config.create_export_dir {
        LocalDirectory::new(&config.export_dir)
    } else {
        LocalDirectory::existing(&config.export_dir)
    };

    println!("📁 Exportaciones en {}", config.export_dir.display());
    println!(
        "⏱️  Frecuencias: {}",
        RatePreset::ALL
            .iter()
            .map(|p| p.label())
            .collect::<Vec<_>>()
            .join(", ")
    );
    println!("⌨️  Comandos: start, stop, toggle, rate <fast|normal|slow|ms>, clear, export, status, quit\n");

    if config.autostart {
        match controller.start() {
            Ok(()) => println!("🎬 Grabando a {}", controller.rate()),
            Err(e) => report_error("start", &e),
        }
    }

    // Hilo lector de stdin
    let (tx_cmd, rx_cmd) = unbounded::<String>();
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            match line {
                Ok(line) => {
                    if tx_cmd.send(line).is_err() {
                        break;
                    }
                }
                Err(e) => {
                    log::error!("stdin read failed: {}", e);
                    break;
                }
            }
        }
    });

    let ticker = tick(Duration::from_millis(config.status_interval_ms.max(100)));

    loop {
        select! {
            recv(rx_cmd) -> msg => {
                let Ok(line) = msg else {
                    // stdin cerrado
                    break;
                };
                let command = match parse_command(&line) {
                    Ok(command) => command,
                    Err(e) if e.is_empty() => continue,
                    Err(e) => {
                        println!("⚠️  {}", e);
                        continue;
                    }
                };

                match command {
                    Command::Start => match controller.start() {
                        Ok(()) => println!("🎬 Grabando a {}", controller.rate()),
                        Err(e) => report_error("start", &e),
                    },
                    Command::Stop => match controller.stop() {
                        Ok(()) => println!("⏹️  Grabación detenida"),
                        Err(e) => report_error("stop", &e),
                    },
                    Command::Toggle => {
                        let result = if controller.state() == RecordingState::Recording {
                            controller.stop()
                        } else {
                            controller.start()
                        };
                        match result {
                            Ok(()) => println!("🔁 {}", controller.state()),
                            Err(e) => report_error("toggle", &e),
                        }
                    }
                    Command::Rate(rate) => {
                        controller.set_rate(rate);
                        println!("⏱️  Frecuencia {}", rate);
                    }
                    Command::Clear => {
                        if !controller.can_clear() {
                            println!("⚠️  Nada que borrar");
                            continue;
                        }
                        let [acc, mag, gyro] = controller.clear_buffers();
                        println!("🗑️  Borradas accel={} mag={} gyro={}", acc, mag, gyro);
                    }
                    Command::Export => {
                        if !controller.can_export() {
                            println!("⚠️  Nada que exportar");
                            continue;
                        }
                        match controller.export(&exporter, &storage) {
                            Ok(report) => println!(
                                "💾 {} filas guardadas en {}",
                                report.rows,
                                report.path.display()
                            ),
                            Err(e) => report_error("export", &e),
                        }
                    }
                    Command::Status => print_status(&controller),
                    Command::Quit => break,
                }
            }
            recv(ticker) -> _ => {
                if controller.state() == RecordingState::Recording {
                    print_status(&controller);
                }
            }
        }
    }

    if controller.state() == RecordingState::Recording {
        if let Err(e) = controller.stop() {
            report_error("stop", &e);
        }
    }
    let [acc, mag, gyro] = controller.buffer_lengths();
    if acc + mag + gyro > 0 {
        println!(
            "ℹ️  Saliendo con datos sin exportar (accel={} mag={} gyro={})",
            acc, mag, gyro
        );
    }
    println!("👋 Saliendo...");
    Ok(())
}
