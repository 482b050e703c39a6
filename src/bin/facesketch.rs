//! CLI for facesketch - pencil-sketch portraits from text.

use clap::{Args, Parser, Subcommand};
use facesketch::{
    HuggingFaceModel, HuggingFaceProvider, ImageRequestController, RenderedImage, SubmitOutcome,
    Variant,
};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "facesketch")]
#[command(about = "Generate pencil-sketch face portraits via the Hugging Face Inference API")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output as JSON
    #[arg(long, global = true)]
    json: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Generate a single sketch from a description
    Generate(GenerateArgs),

    /// Interactive session: describe a face, then refine it line by line
    Session(SessionArgs),
}

#[derive(Args)]
struct ProviderArgs {
    /// Model repository ID
    #[arg(long, default_value = "stabilityai/stable-diffusion-2")]
    model: String,

    /// Inference API base URL
    #[arg(long, env = "FACESKETCH_BASE_URL")]
    base_url: Option<String>,

    /// Send an exclusion clause (the default list unless --exclude is given)
    #[arg(long)]
    negative: bool,
}

#[derive(Args)]
struct GenerateArgs {
    /// Description of the face (e.g., "A middle-aged man with a beard")
    description: String,

    /// Output file path
    #[arg(short, long)]
    output: PathBuf,

    /// Modification appended to the prompt (e.g., "add glasses")
    #[arg(short, long, conflicts_with_all = ["exclude", "negative"])]
    modify: Option<String>,

    /// Attributes to suppress; implies --negative
    #[arg(short, long)]
    exclude: Option<String>,

    /// Print the image as a data URL
    #[arg(long)]
    data_url: bool,

    #[command(flatten)]
    provider: ProviderArgs,
}

#[derive(Args)]
struct SessionArgs {
    /// Directory for generated sketches
    #[arg(short, long, default_value = ".")]
    output_dir: PathBuf,

    #[command(flatten)]
    provider: ProviderArgs,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let _ = dotenvy::dotenv();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("facesketch=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Generate(args) => generate(args, cli.json).await?,
        Commands::Session(args) => session(args, cli.json).await?,
    }

    Ok(())
}

fn build_controller(
    args: &ProviderArgs,
    variant: Variant,
) -> anyhow::Result<ImageRequestController> {
    let mut builder =
        HuggingFaceProvider::builder().model(HuggingFaceModel::from(args.model.as_str()));
    if let Some(url) = &args.base_url {
        builder = builder.base_url(url);
    }
    let provider = builder.build()?;
    Ok(ImageRequestController::new(Arc::new(provider), variant))
}

async fn generate(args: GenerateArgs, json_output: bool) -> anyhow::Result<()> {
    let variant = if args.exclude.is_some() || args.provider.negative {
        Variant::Exclude
    } else {
        Variant::Modify
    };
    let controller = build_controller(&args.provider, variant)?;

    controller.set_subject_description(&args.description);
    if let Some(exclude) = &args.exclude {
        controller.set_exclusion_text(exclude);
    }
    let is_modification = match &args.modify {
        Some(text) => {
            controller.set_modification_text(text);
            true
        }
        None => false,
    };

    let image = match submit_until_ctrl_c(&controller, is_modification).await {
        SubmitOutcome::Rendered(image) => image,
        SubmitOutcome::Ignored => anyhow::bail!("description must not be empty"),
        SubmitOutcome::Failed(e) => return Err(e.into()),
        SubmitOutcome::Cancelled | SubmitOutcome::Superseded => anyhow::bail!("cancelled"),
    };

    image.image().save(&args.output)?;
    report(&image, &args.output, json_output)?;
    if args.data_url && !json_output {
        println!("{}", image.to_data_url());
    }

    Ok(())
}

async fn session(args: SessionArgs, json_output: bool) -> anyhow::Result<()> {
    let variant = if args.provider.negative {
        Variant::Exclude
    } else {
        Variant::Modify
    };
    let controller = build_controller(&args.provider, variant)?;
    tokio::fs::create_dir_all(&args.output_dir).await?;

    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    let Some(description) = ask(&mut lines, "Describe the face: ").await? else {
        return Ok(());
    };
    controller.set_subject_description(description);

    if variant == Variant::Exclude {
        let exclusions = ask(&mut lines, "Exclude (empty for defaults): ").await?;
        controller.set_exclusion_text(exclusions.unwrap_or_default());
    }

    let mut is_modification = false;
    loop {
        if is_modification {
            eprintln!("Modifying...");
        } else {
            eprintln!("Generating...");
        }
        match submit_until_ctrl_c(&controller, is_modification).await {
            SubmitOutcome::Rendered(image) => {
                let path = args.output_dir.join(format!(
                    "sketch-{}.{}",
                    image.generation(),
                    image.image().format.extension()
                ));
                image.image().save(&path)?;
                report(&image, &path, json_output)?;
            }
            SubmitOutcome::Failed(e) => eprintln!("Failed to generate image: {e}"),
            SubmitOutcome::Cancelled => eprintln!("Cancelled."),
            SubmitOutcome::Ignored | SubmitOutcome::Superseded => {}
        }

        if variant == Variant::Exclude {
            break;
        }
        let Some(modification) = ask(&mut lines, "Modify (empty to finish): ").await? else {
            break;
        };
        controller.set_modification_text(modification);
        is_modification = true;
    }

    Ok(())
}

/// Runs one submission, aborting it on Ctrl-C.
async fn submit_until_ctrl_c(
    controller: &ImageRequestController,
    is_modification: bool,
) -> SubmitOutcome {
    let handle = controller.spawn_submit(is_modification);
    let abort = handle.abort_handle();
    tokio::select! {
        outcome = handle.outcome() => outcome,
        _ = tokio::signal::ctrl_c() => {
            abort.abort();
            SubmitOutcome::Cancelled
        }
    }
}

async fn ask<R>(
    lines: &mut tokio::io::Lines<R>,
    prompt: &str,
) -> anyhow::Result<Option<String>>
where
    R: tokio::io::AsyncBufRead + Unpin,
{
    let mut stderr = tokio::io::stderr();
    stderr.write_all(prompt.as_bytes()).await?;
    stderr.flush().await?;

    let line = lines.next_line().await?;
    Ok(line.map(|l| l.trim().to_string()).filter(|l| !l.is_empty()))
}

fn report(image: &RenderedImage, path: &Path, json_output: bool) -> anyhow::Result<()> {
    let generated = image.image();
    if json_output {
        let result = serde_json::json!({
            "success": true,
            "output": path.display().to_string(),
            "size_bytes": generated.size(),
            "format": generated.format.extension(),
            "model": generated.metadata.model,
            "duration_ms": generated.metadata.duration_ms,
            "generation": image.generation(),
        });
        println!("{}", serde_json::to_string_pretty(&result)?);
    } else {
        println!(
            "Generated sketch: {} ({} bytes)",
            path.display(),
            generated.size()
        );
        if let Some(duration) = generated.metadata.duration_ms {
            println!("Duration: {}ms", duration);
        }
    }
    Ok(())
}
