// main.rs - Terminal front end for ecoscan.
//
// Takes one image from disk (as the file picker or a drop would) or from the
// camera, runs one analysis and prints the session view.

use clap::{Parser, Subcommand};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use ecoscan_lib::capture::ffmpeg;
use ecoscan_lib::settings::{self, Settings};
use ecoscan_lib::{
    AnalyzeOutcome, CameraSession, FileSource, GeminiClient, SessionController, SessionView,
};

#[derive(Parser)]
#[command(name = "ecoscan", version, about = "Identify waste items and how to dispose of them")]
struct Cli {
    /// Settings file (defaults to the user config directory)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Print the session view as JSON
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    #[command(flatten)]
    Input(Input),
    /// Write default settings to the config path
    InitConfig {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

/// Where the image to analyze comes from.
#[derive(Subcommand)]
enum Input {
    /// Analyze an image file
    Analyze { file: PathBuf },
    /// Analyze dropped files (only the first is used)
    Drop {
        #[arg(required = true)]
        files: Vec<PathBuf>,
    },
    /// Take a snapshot with the camera and analyze it
    Camera {
        /// Milliseconds to let the camera settle before the snapshot
        #[arg(long)]
        warmup_ms: Option<u64>,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    settings::load_dotenv();
    env_logger::init();

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> Result<ExitCode, Box<dyn std::error::Error>> {
    let path = match cli.config {
        Some(p) => p,
        None => settings::config_path()?,
    };

    let input = match cli.command {
        Command::InitConfig { force } => return init_config(&path, force),
        Command::Input(input) => input,
    };

    let settings = Settings::load(&path)?.with_env_overrides();
    let client = GeminiClient::from_settings(&settings)?;
    let controller = SessionController::new(Arc::new(client))
        // Let the HTTP timeout fire first so the log names the real cause.
        .with_timeout(settings.request_timeout() + Duration::from_secs(5));

    let source = FileSource::new(settings.max_image_bytes);
    match input {
        Input::Analyze { file } => controller.select_image(source.pick(&file).await?),
        Input::Drop { files } => controller.select_image(source.drop_files(&files).await?),
        Input::Camera { warmup_ms } => {
            let warmup = warmup_ms.map_or(settings.camera.warmup(), Duration::from_millis);
            snapshot(&controller, &settings, warmup).await?
        }
    }

    let outcome = controller.analyze().await;
    log::debug!("Analyze finished: {:?}", outcome);
    let view = controller.view();

    if cli.json {
        println!("{}", serde_json::to_string_pretty(&view)?);
    } else {
        print!("{}", render(&view));
    }

    let failed = outcome != AnalyzeOutcome::Settled || view.error.is_some();
    Ok(if failed { ExitCode::FAILURE } else { ExitCode::SUCCESS })
}

/// Open the camera, let it settle, and select one frame.
async fn snapshot(
    controller: &SessionController,
    settings: &Settings,
    warmup: Duration,
) -> Result<(), Box<dyn std::error::Error>> {
    let device = ffmpeg::detect(&settings.camera).await;
    let mut camera = CameraSession::from_settings(device, settings);
    camera.open().await;
    if let Some(message) = camera.error() {
        return Err(message.into());
    }

    tokio::time::sleep(warmup).await;
    controller.select_from_camera(&mut camera)?;
    Ok(())
}

fn init_config(path: &Path, force: bool) -> Result<ExitCode, Box<dyn std::error::Error>> {
    if path.exists() && !force {
        return Err(format!("{} already exists (use --force)", path.display()).into());
    }
    Settings::default().save(path)?;
    println!("{}", path.display());
    Ok(ExitCode::SUCCESS)
}

fn render(view: &SessionView) -> String {
    if let Some(error) = &view.error {
        return format!("{}\n", error);
    }
    let Some(result) = &view.result else {
        return "No result.\n".to_string();
    };
    format!(
        "Analysis complete: {}\n\n  Category:            {}\n  Disposal suggestion: {}\n  Eco-friendly tip:    {}\n",
        result.object_name, result.classification, result.disposal_suggestion, result.eco_tip
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use ecoscan_lib::session::Phase;
    use ecoscan_lib::{ClassificationResult, WasteCategory};

    fn view(result: Option<ClassificationResult>, error: Option<&str>) -> SessionView {
        SessionView {
            phase: Phase::Settled,
            selection: None,
            pending: false,
            result,
            error: error.map(str::to_string),
        }
    }

    #[test]
    fn renders_result_card() {
        let text = render(&view(
            Some(ClassificationResult {
                object_name: "apple core".into(),
                classification: WasteCategory::Compostable,
                disposal_suggestion: "Green bin.".into(),
                eco_tip: "Compost at home.".into(),
            }),
            None,
        ));
        assert!(text.starts_with("Analysis complete: apple core"));
        assert!(text.contains("Compostable"));
        assert!(text.contains("Green bin."));
        assert!(text.contains("Compost at home."));
    }

    #[test]
    fn renders_error_alone() {
        let text = render(&view(None, Some("Failed to analyze the image. Please try again.")));
        assert_eq!(text, "Failed to analyze the image. Please try again.\n");
    }

    #[test]
    fn cli_parses_drop_with_global_flags() {
        let cli = Cli::try_parse_from(["ecoscan", "drop", "a.png", "b.png", "--json"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Input(Input::Drop { files }) => assert_eq!(files.len(), 2),
            _ => panic!("expected drop"),
        }
    }

    #[test]
    fn cli_parses_camera_and_init_config() {
        let cli = Cli::try_parse_from(["ecoscan", "camera", "--warmup-ms", "250"]).unwrap();
        assert!(matches!(
            cli.command,
            Command::Input(Input::Camera { warmup_ms: Some(250) })
        ));

        let cli = Cli::try_parse_from(["ecoscan", "init-config", "--force"]).unwrap();
        assert!(matches!(cli.command, Command::InitConfig { force: true }));
    }
}
