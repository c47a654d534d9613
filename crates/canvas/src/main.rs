use std::path::PathBuf;

use anyhow::{Context, Result, anyhow};
use canvas::{CanvasSettings, CanvasSurface, SurfaceMetrics, Workspace};
use clap::{Parser, ValueEnum};
use document::PatchDocument;
use document_protocol::{DocumentCommand, DocumentCommands, NewObject, ObjectId};
use engine::{EngineCommand, ExecutionEngine, SharedDocument, create_engine_channels};
use model::Point;
use renderer::{FrameOutcome, RecordingBackend, RenderBackend, WgpuBackend, WgpuBackendConfig};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(author, version, about = "Drive a patch canvas view headlessly")]
struct Arguments {
    /// Canvas settings file (TOML). Defaults apply when omitted.
    #[arg(long, short = 's', value_parser)]
    settings: Option<PathBuf>,
    /// Render backend.
    #[arg(long, value_enum, default_value = "recording")]
    backend: BackendKind,
    /// Number of display ticks to run.
    #[arg(long, default_value_t = 8)]
    frames: u32,
    #[arg(long, default_value_t = 800)]
    width: u32,
    #[arg(long, default_value_t = 600)]
    height: u32,
    #[arg(long, default_value_t = 1.0)]
    pixel_scale: f32,
}

#[derive(Clone, Copy, Debug, PartialEq, ValueEnum)]
enum BackendKind {
    /// Records backend calls without touching a GPU.
    Recording,
    /// Offscreen wgpu rendering.
    Wgpu,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let arguments = Arguments::parse();
    let settings = match &arguments.settings {
        Some(path) => CanvasSettings::load(path)
            .with_context(|| format!("load settings from {}", path.display()))?,
        None => CanvasSettings::default(),
    };
    if !arguments.pixel_scale.is_finite() || arguments.pixel_scale <= 0.0 {
        return Err(anyhow!("pixel scale must be positive"));
    }

    match arguments.backend {
        BackendKind::Recording => {
            let surface = run(&arguments, &settings, RecordingBackend::new())?;
            let backend = surface.renderer().backend();
            tracing::info!(
                calls = backend.calls().len(),
                passes = backend.passes().len(),
                live_targets = backend.live_targets(),
                "recording backend summary"
            );
        }
        BackendKind::Wgpu => {
            let backend = WgpuBackend::new(WgpuBackendConfig {
                presentation_width: arguments.width,
                presentation_height: arguments.height,
                ..WgpuBackendConfig::default()
            });
            let surface = run(&arguments, &settings, backend)?;
            let pixels = surface
                .renderer()
                .backend()
                .read_presentation()
                .context("read presented frame")?;
            tracing::info!(bytes = pixels.len(), "read back presented frame");
        }
    }
    Ok(())
}

fn run<B: RenderBackend>(
    arguments: &Arguments,
    settings: &CanvasSettings,
    backend: B,
) -> Result<CanvasSurface<B>> {
    let mut document = PatchDocument::new();
    let ids = seed_document(&mut document).context("seed document")?;
    let shared = SharedDocument::new(document);

    let (mut ui, engine_channels) = create_engine_channels(settings.channel_capacities());
    let engine =
        ExecutionEngine::spawn(shared.clone(), engine_channels).context("start engine")?;

    let mut workspace = Workspace::new(shared, settings.clone());
    let view = workspace.open_view();
    let mut surface = CanvasSurface::new(backend, settings);
    let metrics = SurfaceMetrics::new(arguments.width, arguments.height, arguments.pixel_scale);

    ui.commands
        .submit(DocumentCommand::CreateObject(
            NewObject::text("print result", Point::new(40, 200)).with_ports(1, 0),
        ))
        .context("submit create")?;
    for id in &ids {
        ui.commands
            .submit(EngineCommand::Activity(*id))
            .context("submit activity")?;
    }

    for frame in 0..arguments.frames {
        workspace.pump(&ui.notices, &mut ui.tasks);
        let canvas = workspace
            .view_mut(view)
            .ok_or_else(|| anyhow!("view closed while running"))?;
        match surface.tick(canvas, metrics) {
            Ok(FrameOutcome::Presented {
                repainted,
                node_caches_refreshed,
                state,
            }) => {
                tracing::info!(
                    frame,
                    ?repainted,
                    node_caches_refreshed,
                    ?state,
                    nodes = canvas.scene().node_count(),
                    "presented"
                );
            }
            Ok(outcome) => tracing::info!(frame, ?outcome, "tick"),
            Err(error) => tracing::warn!(frame, %error, "tick failed"),
        }
        std::thread::sleep(settings.frame_budget());
    }

    ui.commands
        .submit_blocking(EngineCommand::Shutdown)
        .context("stop engine")?;
    engine.join().context("join engine")?;
    let objects = workspace.document().read(|document| document.object_count());
    tracing::info!(objects, "engine stopped");
    Ok(surface)
}

fn seed_document(document: &mut PatchDocument) -> Result<Vec<ObjectId>> {
    let metro = document.create_object(
        NewObject::text("metro 500", Point::new(40, 40)).with_ports(2, 1),
    )?;
    let counter =
        document.create_object(NewObject::text("counter", Point::new(40, 120)).with_ports(1, 1))?;
    document.connect(metro, 0, counter, 0)?;
    Ok(vec![metro, counter])
}
