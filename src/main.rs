use std::path::PathBuf;

use aac_processors::config::Settings;
use aac_processors::io::{BoardFormat, Source};
use aac_processors::translate::{TranslationMap, default_output_path, extract_with_context};
use aac_processors::{ProcessorError, Result, sync};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

fn main() {
    let cli = Cli::parse();
    if let Err(error) = run(cli) {
        eprintln!("error: {error}");
        std::process::exit(1);
    }
}

fn run(cli: Cli) -> Result<()> {
    init_logging(cli.verbose)?;
    let settings = Settings::load_or_default(cli.config.as_deref())?;
    match cli.command {
        Command::Convert(args) => execute_convert(args, &settings),
        Command::Extract(args) => execute_extract(args, &settings),
        Command::Translate(args) => execute_translate(args, &settings),
    }
}

fn init_logging(verbose: bool) -> Result<()> {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .try_init()
        .map_err(|err| ProcessorError::Logging(err.to_string()))
}

fn execute_convert(args: ConvertArgs, settings: &Settings) -> Result<()> {
    if !args.input.exists() {
        return Err(ProcessorError::MissingInput(args.input));
    }
    sync::convert(&args.input, &args.output, args.from, args.to, settings)?;
    Ok(())
}

fn execute_extract(args: ExtractArgs, settings: &Settings) -> Result<()> {
    if !args.input.exists() {
        return Err(ProcessorError::MissingInput(args.input));
    }

    if args.context {
        let processor = sync::processor_for(&args.input, args.from, settings)?;
        let tree = processor.load_into_tree(Source::Path(&args.input))?;
        let texts = extract_with_context(&tree);
        println!("{}", serde_json::to_string_pretty(&texts)?);
        return Ok(());
    }

    let texts = sync::extract(&args.input, args.from, settings)?;
    if args.json {
        println!("{}", serde_json::to_string_pretty(&texts)?);
    } else {
        for text in texts {
            println!("{text}");
        }
    }
    Ok(())
}

fn execute_translate(args: TranslateArgs, settings: &Settings) -> Result<()> {
    if !args.input.exists() {
        return Err(ProcessorError::MissingInput(args.input));
    }

    let mut translations = TranslationMap::load(&args.translations)?;
    if let Some(lang) = args.target_lang {
        translations = translations.with_target_lang(lang);
    }
    let output = match args.output {
        Some(output) => output,
        None => {
            let lang = translations.target_lang().unwrap_or("translated");
            default_output_path(&args.input, lang)
        }
    };
    sync::translate(&args.input, &translations, &output, args.from, settings)?;
    Ok(())
}

#[derive(Parser)]
#[command(
    name = "aac-processors",
    author,
    version,
    about = "Convert and translate AAC communication board files."
)]
struct Cli {
    /// Log at debug level unless RUST_LOG says otherwise.
    #[arg(short, long, global = true)]
    verbose: bool,

    /// JSON settings file.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Convert a board set from one format into another.
    Convert(ConvertArgs),
    /// Print the translatable strings of a board set.
    Extract(ExtractArgs),
    /// Apply a translation map to a board set.
    Translate(TranslateArgs),
}

#[derive(clap::Args)]
struct ConvertArgs {
    /// Input file path.
    #[arg(long)]
    input: PathBuf,

    /// Output file path.
    #[arg(long)]
    output: PathBuf,

    /// Source format, when the input extension is not enough.
    #[arg(long, value_enum)]
    from: Option<BoardFormat>,

    /// Target format, when the output extension is not enough.
    #[arg(long, value_enum)]
    to: Option<BoardFormat>,
}

#[derive(clap::Args)]
struct ExtractArgs {
    /// Input file path.
    #[arg(long)]
    input: PathBuf,

    #[arg(long, value_enum)]
    from: Option<BoardFormat>,

    /// Print a JSON array instead of one string per line.
    #[arg(long)]
    json: bool,

    /// Print JSON records with page path and symbol for each string.
    #[arg(long, conflicts_with = "json")]
    context: bool,
}

#[derive(clap::Args)]
struct TranslateArgs {
    /// Input file path.
    #[arg(long)]
    input: PathBuf,

    /// JSON object mapping original strings to replacements.
    #[arg(long)]
    translations: PathBuf,

    /// Output file path. Defaults to `<stem>_<lang>.<ext>` next to the input.
    #[arg(long)]
    output: Option<PathBuf>,

    #[arg(long, value_enum)]
    from: Option<BoardFormat>,

    /// Target language written into formats that record one.
    #[arg(long)]
    target_lang: Option<String>,
}
