//! `beamtrack` CLI: track reference lattices or JSON beamlines, optics tables, lattice export.

use anyhow::{Context, Result};
use beam_sim::{
    load_description, save_description, save_records, save_twiss, Lattice, LatticeKind,
};
use beamline_core::integrators::IntegratorKind;
use beamline_core::observers::{
    LossesObserver, MeanObserver, Observer, SigmaObserver, TwissObserver,
};
use beamline_core::twiss::TwissPropagator;
use beamline_core::{
    ElementDescription, ObservationMode, Sequence, SequenceBuilder, Tracker, TrackingConfig,
    TrackingResult,
};
use clap::{Parser, Subcommand, ValueEnum};
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(name = "beamtrack", about = "Charged-particle beamline tracking CLI")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

/// Which observer table to record.
#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
enum Quantity {
    Mean,
    Sigma,
    Losses,
    Twiss,
}

#[derive(Subcommand)]
enum Commands {
    /// Track a beam through a lattice and record one observer table.
    Track {
        #[arg(value_enum)]
        lattice: LatticeKind,
        /// Replace the lattice's beamline with a JSON description (beam is kept)
        #[arg(long)]
        description: Option<PathBuf>,
        /// Integrator for thick elements (mad8, exact, transport)
        #[arg(long)]
        integrator: Option<IntegratorKind>,
        #[arg(long, default_value_t = 10_000)]
        particles: usize,
        /// Random seed for reproducibility
        #[arg(long, default_value_t = 42)]
        seed: u64,
        #[arg(long, default_value_t = 1)]
        turns: usize,
        /// Record only at the end of each turn
        #[arg(long)]
        end_of_turn: bool,
        #[arg(long, value_enum, default_value_t = Quantity::Sigma)]
        observe: Quantity,
        /// Write the observer table to a JSON file
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Propagate the optics of a lattice without particles.
    Twiss {
        #[arg(value_enum)]
        lattice: LatticeKind,
        /// Start from the periodic solution instead of the lattice's entrance optics
        #[arg(long)]
        periodic: bool,
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Write a lattice as a JSON beamline description.
    ExportLattice {
        #[arg(value_enum)]
        lattice: LatticeKind,
        output: PathBuf,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Track {
            lattice,
            description,
            integrator,
            particles,
            seed,
            turns,
            end_of_turn,
            observe,
            output,
        } => {
            let config = TrackingConfig {
                turns,
                observe: if end_of_turn {
                    ObservationMode::EndOfTurn
                } else {
                    ObservationMode::EveryElement
                },
                ..Default::default()
            };
            let lattice = Lattice::build(lattice, particles, seed)?;
            let sequence = beamline(&lattice, description.as_deref(), integrator)?;
            run_track(&lattice, &sequence, config, observe, output.as_deref())?;
        }
        Commands::Twiss {
            lattice,
            periodic,
            output,
        } => {
            run_twiss(lattice, periodic, output.as_deref())?;
        }
        Commands::ExportLattice { lattice, output } => {
            let lattice = Lattice::build(lattice, 1, 0)?;
            save_description(&lattice.sequence, &output)?;
            println!("Lattice '{}' saved to {}", lattice.name, output.display());
        }
    }

    Ok(())
}

/// The sequence to track: the lattice's own or one read from `description`.
fn beamline(
    lattice: &Lattice,
    description: Option<&Path>,
    integrator: Option<IntegratorKind>,
) -> Result<Sequence> {
    let descriptions = match description {
        Some(path) => load_description(path)?,
        None if integrator.is_some() => lattice
            .sequence
            .elements()
            .iter()
            .map(ElementDescription::from)
            .collect(),
        None => return Ok(lattice.sequence.clone()),
    };
    let mut builder = SequenceBuilder::from_descriptions(&descriptions)?;
    if let Some(kind) = integrator {
        builder = builder.with_default_integrator(kind);
    }
    let sequence = builder.freeze().context("building the beamline")?;
    Ok(sequence)
}

fn run_track(
    lattice: &Lattice,
    sequence: &Sequence,
    config: TrackingConfig,
    quantity: Quantity,
    output: Option<&Path>,
) -> Result<()> {
    let tracker = Tracker::new(config);
    let beam = lattice.beam.sample()?;
    println!(
        "Tracking {} particles through '{}' ({} elements, {} turn(s))...",
        beam.len(),
        lattice.name,
        sequence.len(),
        tracker.config.turns
    );
    let start = std::time::Instant::now();

    match quantity {
        Quantity::Mean => {
            let result = run(&tracker, sequence, beam, MeanObserver::default())?;
            finish(&result, start, output, |p| save_records(result.observer.records(), p))
        }
        Quantity::Sigma => {
            let result = run(&tracker, sequence, beam, SigmaObserver::default())?;
            finish(&result, start, output, |p| save_records(result.observer.records(), p))
        }
        Quantity::Losses => {
            let result = run(&tracker, sequence, beam, LossesObserver::default())?;
            finish(&result, start, output, |p| save_records(result.observer.records(), p))
        }
        Quantity::Twiss => {
            let result = run(&tracker, sequence, beam, TwissObserver::default())?;
            finish(&result, start, output, |p| save_records(result.observer.records(), p))
        }
    }
}

fn run<O: Observer>(
    tracker: &Tracker,
    sequence: &Sequence,
    beam: beamline_core::Beam,
    observer: O,
) -> Result<TrackingResult<O>> {
    Ok(tracker.track(sequence, beam, observer)?)
}

fn finish<O>(
    result: &TrackingResult<O>,
    start: std::time::Instant,
    output: Option<&Path>,
    save: impl FnOnce(&Path) -> Result<()>,
) -> Result<()> {
    println!(
        "Done: {} alive, {} lost, transmission={:.4}, elapsed={:.2}s",
        result.beam.len(),
        result.beam.lost.len(),
        result.beam.transmission(),
        start.elapsed().as_secs_f64()
    );
    if let Some(path) = output {
        save(path)?;
        println!("Records saved to {}", path.display());
    }
    Ok(())
}

fn run_twiss(kind: LatticeKind, periodic: bool, output: Option<&Path>) -> Result<()> {
    let lattice = Lattice::build(kind, 1, 0)?;
    let propagator = TwissPropagator::new(lattice.kinematics);
    let table = if periodic {
        propagator.periodic_table(&lattice.sequence)?
    } else {
        propagator.propagate(&lattice.sequence, &lattice.twiss)?
    };

    println!(
        "{:<10} {:>8} {:>10} {:>8} {:>10} {:>8} {:>8}",
        "element", "s", "beta_x", "alpha_x", "beta_y", "alpha_y", "D_x"
    );
    for row in table.rows() {
        println!(
            "{:<10} {:>8.3} {:>10.4} {:>8.4} {:>10.4} {:>8.4} {:>8.4}",
            row.element,
            row.s,
            row.twiss.x.beta,
            row.twiss.x.alpha,
            row.twiss.y.beta,
            row.twiss.y.alpha,
            row.twiss.x.dispersion
        );
    }
    let (qx, qy) = table.tunes();
    println!("Phase advance / 2π: x={qx:.4}, y={qy:.4}");

    if let Some(path) = output {
        save_twiss(&table, path)?;
        println!("Optics saved to {}", path.display());
    }
    Ok(())
}
