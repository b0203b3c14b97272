use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Context as _;
use clap::{Parser, Subcommand};
use nodecomp::Context as _;

#[derive(Parser, Debug)]
#[command(name = "nodecomp", version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    cmd: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate a tree document and write one output as a PNG.
    Eval(EvalArgs),
    /// Print the node order the scheduler produces for the root tree.
    Schedule(ScheduleArgs),
}

#[derive(Parser, Debug)]
struct EvalArgs {
    /// Input tree document JSON.
    #[arg(long = "in")]
    in_path: PathBuf,

    /// Output PNG path.
    #[arg(long, default_value = "out.png")]
    out: PathBuf,

    /// Root interface output to write. Defaults to the first one.
    #[arg(long)]
    output: Option<String>,

    /// Frame number seen by time-dependent nodes.
    #[arg(long, default_value_t = 0)]
    frame: i64,

    /// Run fused pixel units through the software GPU device.
    #[arg(long)]
    gpu_emulation: bool,

    /// Worker threads for CPU pixel work.
    #[arg(long)]
    threads: Option<usize>,

    /// Print per-node execution times.
    #[arg(long)]
    profile: bool,
}

#[derive(Parser, Debug)]
struct ScheduleArgs {
    /// Input tree document JSON.
    #[arg(long = "in")]
    in_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_writer(std::io::stderr)
        .init();

    match cli.cmd {
        Command::Eval(args) => cmd_eval(args),
        Command::Schedule(args) => cmd_schedule(args),
    }
}

fn load_tree(path: &Path) -> anyhow::Result<Arc<nodecomp::NodeTree>> {
    let doc = nodecomp::TreeDocument::from_path(path)
        .with_context(|| format!("read tree document '{}'", path.display()))?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    let registry = nodecomp::NodeTypeRegistry::with_builtins();
    Ok(doc.build(&registry, Some(base_dir))?)
}

fn cmd_eval(args: EvalArgs) -> anyhow::Result<()> {
    let tree = load_tree(&args.in_path)?;
    let output = match args.output {
        Some(o) => o,
        None => tree
            .interface_outputs()
            .first()
            .map(|s| s.identifier.clone())
            .context("root tree has no outputs")?,
    };

    let mut builder = nodecomp::StandardContext::builder()
        .frame(args.frame)
        .profile(args.profile);
    if args.gpu_emulation {
        builder = builder.gpu(Arc::new(nodecomp::SoftwareDevice::new()));
    }
    if let Some(n) = args.threads {
        builder = builder.threads(n);
    }
    let compositor = nodecomp::Compositor::new(builder.build()?);

    let opts = nodecomp::CompositorOpts {
        outputs: Some(vec![output.clone()]),
        ..nodecomp::CompositorOpts::default()
    };
    let eval = compositor.evaluate(&tree, &opts)?;

    let (width, height, rgba8) = match eval.outputs.get(&output) {
        Some(nodecomp::EvaluatedOutput::Image(buf)) => {
            let d = buf.domain();
            (d.width, d.height, buf.to_rgba8())
        }
        Some(nodecomp::EvaluatedOutput::Single(v)) => {
            let px = nodecomp::PixelBuffer::filled(
                nodecomp::Domain::new(1, 1),
                nodecomp::ResultType::Color,
                *v,
            );
            (1, 1, px.to_rgba8())
        }
        Some(nodecomp::EvaluatedOutput::Invalid) | None => {
            anyhow::bail!("output '{output}' could not be computed")
        }
    };

    if let Some(parent) = args.out.parent()
        && !parent.as_os_str().is_empty()
    {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("create output dir '{}'", parent.display()))?;
    }
    image::save_buffer_with_format(
        &args.out,
        &rgba8,
        width,
        height,
        image::ColorType::Rgba8,
        image::ImageFormat::Png,
    )
    .with_context(|| format!("write png '{}'", args.out.display()))?;

    if let Some(profiler) = compositor.context().profiler() {
        for node in tree.nodes() {
            let key = nodecomp::InstanceKey::ROOT.child(&node.name);
            if let Some(t) = profiler.node_execution_time(key) {
                eprintln!("  {:<24} {:>10.3} ms", node.name, t.as_secs_f64() * 1e3);
            }
        }
        if let Some(total) = eval.total_time {
            eprintln!("  {:<24} {:>10.3} ms", "total", total.as_secs_f64() * 1e3);
        }
    }

    eprintln!("wrote {}", args.out.display());
    Ok(())
}

fn cmd_schedule(args: ScheduleArgs) -> anyhow::Result<()> {
    use nodecomp::Scheduler as _;

    let tree = load_tree(&args.in_path)?;
    let needed = tree
        .interface_outputs()
        .iter()
        .map(|s| s.identifier.clone())
        .collect();
    let schedule = nodecomp::DepthFirstScheduler.schedule(
        &tree,
        &nodecomp::ScheduleRequest {
            output_types: nodecomp::OutputTypes::ALL,
            needed_outputs: &needed,
            instance_key: nodecomp::InstanceKey::ROOT,
            active_instance_key: nodecomp::InstanceKey::ROOT,
        },
    );
    for (i, id) in schedule.iter().enumerate() {
        let node = tree.node(id);
        println!("{i:>3}  {}  ({:?})", node.name, node.kind);
    }
    Ok(())
}
