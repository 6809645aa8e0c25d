use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use loadfile_core::config::{self, AppConfig};
use loadfile_core::{classifier, LoadContext, LoadFileNode, LoadMode, LoadOutput};
use std::path::{Path, PathBuf};
use storage::InputStore;
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    let cfg = config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::Detect { paths, json } => run_detect(&cfg, &paths, json),
        Commands::Load { file, mode, input, json } => run_load(cfg, &file, &mode, input, json),
        Commands::List { json } => run_list(cfg, json),
        Commands::Upload { path, json } => run_upload(&cfg, &path, json),
        Commands::Serve { bind } => {
            let bind = bind.unwrap_or_else(|| cfg.server.bind.clone());
            let store = InputStore::new(&cfg.input.dir);
            cli::server::serve(&bind, store, cfg.server.max_upload_bytes()).await
        }
    }
}

#[derive(Parser)]
#[command(name = "loadfile")]
#[command(about = "Classify and load images, video, models, latents and text", long_about = None)]
struct Cli {
    /// Path to config TOML
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print the detected kind of each file
    Detect {
        #[arg(required = true)]
        paths: Vec<PathBuf>,
        #[arg(long)]
        json: bool,
    },
    /// Load a file and print its payload
    Load {
        file: String,
        /// auto, image, video, model, latent, text, binary or generic
        #[arg(short, long, default_value = "auto")]
        mode: String,
        /// Resolve FILE against the input directory instead of the working directory
        #[arg(long, default_value_t = false)]
        input: bool,
        #[arg(long)]
        json: bool,
    },
    /// List loadable files in the input directory
    List {
        #[arg(long)]
        json: bool,
    },
    /// Copy a local file into the input directory
    Upload {
        path: PathBuf,
        #[arg(long)]
        json: bool,
    },
    /// Run the upload/listing HTTP service
    Serve {
        /// Overrides server.bind
        #[arg(long)]
        bind: Option<String>,
    },
}

fn run_detect(cfg: &AppConfig, paths: &[PathBuf], json: bool) -> Result<()> {
    let mut rows = Vec::with_capacity(paths.len());
    for path in paths {
        let kind = classifier::classify(path, &cfg.classifier);
        if json {
            rows.push(serde_json::json!({
                "path": path,
                "kind": kind,
            }));
        } else {
            println!("{}\t{}", kind, path.display());
        }
    }
    if json {
        println!("{}", serde_json::to_string_pretty(&rows)?);
    }
    Ok(())
}

fn run_load(cfg: AppConfig, file: &str, mode: &str, input: bool, json: bool) -> Result<()> {
    let ctx = LoadContext::new(cfg);
    let output = if input {
        LoadFileNode::new(ctx).load(file, mode)
    } else {
        let mode: LoadMode = mode.parse()?;
        loadfile_core::load_file(&ctx, Path::new(file), mode)
    };
    if json {
        println!("{}", serde_json::to_string_pretty(&summary_json(&output))?);
    } else {
        println!("mode: {}", output.mode);
        if let Some(kind) = output.kind {
            println!("kind: {}", kind);
        }
        println!("image: {:?}", output.image.shape());
        println!("mask: {:?}", output.mask.shape());
        println!("{}", output.payload_json());
    }
    if output.is_error() {
        std::process::exit(1);
    }
    Ok(())
}

fn summary_json(output: &LoadOutput) -> serde_json::Value {
    serde_json::json!({
        "mode": output.mode,
        "kind": output.kind,
        "payload": output.payload,
        "info": output.info,
        "image_shape": output.image.shape(),
        "mask_shape": output.mask.shape(),
        "latent_shapes": output.latent.as_ref().map(|l| {
            l.iter().map(|(k, t)| (k.clone(), t.shape().to_vec())).collect::<std::collections::BTreeMap<_, _>>()
        }),
    })
}

fn run_list(cfg: AppConfig, json: bool) -> Result<()> {
    let node = LoadFileNode::new(LoadContext::new(cfg));
    let inputs = node.input_types();
    if json {
        println!("{}", serde_json::to_string_pretty(&inputs)?);
    } else {
        for f in &inputs.files {
            println!("{}", f);
        }
    }
    Ok(())
}

fn run_upload(cfg: &AppConfig, path: &Path, json: bool) -> Result<()> {
    let data = std::fs::read(path).with_context(|| format!("reading {}", path.display()))?;
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .context("path has no file name")?;
    let store = InputStore::new(&cfg.input.dir);
    let stored = store.save_unique(&name, &data)?;
    if json {
        println!("{}", serde_json::to_string_pretty(&stored)?);
    } else {
        println!("saved {} ({} bytes)", stored.path.display(), stored.size);
    }
    Ok(())
}
