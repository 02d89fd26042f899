use anyhow::{bail, Context, Result};
use bci_lib::{
    io::{csv::DEFAULT_FS, CsvDatasetIo, RecordingIo},
    pipeline::{ModelCatalog, PipelineSpec},
    project::{FieldValue, MetadataField, ProjectStore, Stage},
    Settings,
};
use clap::{Parser, Subcommand};
use env_logger::Env;
use log::debug;
use std::path::{Path, PathBuf};

#[derive(Parser)]
#[command(
    name = "bci",
    version,
    about = "BCI Lab: project workspaces and processing pipelines"
)]
struct Cli {
    /// Projects directory (overrides $BCI_PROJECTS_DIR and the config file)
    #[arg(long, global = true)]
    projects_dir: Option<PathBuf>,

    /// Logging verbosity (e.g., debug, info, warn)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Create, inspect and update projects
    #[command(subcommand)]
    Project(ProjectCommand),
    /// Check pipeline configurations and attach them to projects
    #[command(subcommand)]
    Pipeline(PipelineCommand),
}

#[derive(Subcommand)]
enum ProjectCommand {
    /// Create a project with the standard directory layout
    Create { name: String },
    /// List registered projects with their progress
    List {
        /// Print the listing as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a project's root directory
    Path { name: String },
    /// Print a project's metadata document
    Show { name: String },
    /// Delete a project's directory and registry entry
    Delete {
        name: String,
        /// Repeat the project name to confirm
        #[arg(long)]
        confirm: String,
    },
    /// Set a metadata field (description, contributors, ...)
    Set {
        name: String,
        field: String,
        value: String,
    },
    /// Mark a progress stage complete (or incomplete with --undo)
    Stage {
        name: String,
        stage: String,
        #[arg(long)]
        undo: bool,
    },
    /// Copy a recording into the project's input data
    Import { name: String, file: PathBuf },
    /// Load every imported recording (CSV or EDF) joined end to end
    Inputs {
        name: String,
        /// Sampling rate for CSV inputs without a timestamp column
        #[arg(long, default_value_t = DEFAULT_FS)]
        fallback_fs: f64,
    },
}

#[derive(Subcommand)]
enum PipelineCommand {
    /// Validate a pipeline configuration file
    Check {
        file: PathBuf,
        /// Print validation errors as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print the model catalog as JSON
    Models,
    /// Validate a configuration and store it in a project's settings
    Attach { name: String, file: PathBuf },
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(Env::default().default_filter_or(&cli.log_level)).init();

    match cli.command {
        Commands::Project(command) => {
            let store = open_store(cli.projects_dir.as_deref())?;
            run_project(&store, command)?
        }
        Commands::Pipeline(PipelineCommand::Check { file, json }) => cmd_check(&file, json)?,
        Commands::Pipeline(PipelineCommand::Models) => {
            println!(
                "{}",
                serde_json::to_string_pretty(ModelCatalog::builtin().models())?
            );
        }
        Commands::Pipeline(PipelineCommand::Attach { name, file }) => {
            let store = open_store(cli.projects_dir.as_deref())?;
            cmd_attach(&store, &name, &file)?
        }
    }
    Ok(())
}

fn open_store(projects_dir: Option<&Path>) -> Result<ProjectStore> {
    let settings = match projects_dir {
        Some(dir) => Settings::new(dir),
        None => Settings::load()?,
    };
    debug!("projects directory: {}", settings.projects_dir.display());
    ProjectStore::from_settings(&settings).with_context(|| {
        format!(
            "opening projects directory {}",
            settings.projects_dir.display()
        )
    })
}

fn run_project(store: &ProjectStore, command: ProjectCommand) -> Result<()> {
    match command {
        ProjectCommand::Create { name } => {
            let root = store.create_project(&name)?;
            println!("{}", root.display());
        }
        ProjectCommand::List { json } => cmd_list(store, json)?,
        ProjectCommand::Path { name } => println!("{}", store.resolve_path(&name)?.display()),
        ProjectCommand::Show { name } => {
            let doc = store.metadata(&name)?.load()?;
            println!("{}", serde_json::to_string_pretty(&doc)?);
        }
        ProjectCommand::Delete { name, confirm } => {
            store.delete_project(&name, &confirm)?;
            println!("deleted {}", name);
        }
        ProjectCommand::Set { name, field, value } => {
            let field: MetadataField = field.parse()?;
            store.update_metadata(&name, |doc| doc.set_field(field, FieldValue::from(value)))?;
        }
        ProjectCommand::Stage { name, stage, undo } => {
            let stage: Stage = stage.parse()?;
            let doc = store.update_metadata(&name, |doc| {
                doc.set_stage(stage, !undo);
                Ok(())
            })?;
            println!("{}", doc.progress.summary());
        }
        ProjectCommand::Import { name, file } => {
            let dest = store
                .import_input(&name, &file)
                .with_context(|| format!("importing {} into {}", file.display(), name))?;
            println!("{}", dest.display());
        }
        ProjectCommand::Inputs { name, fallback_fs } => {
            let io = RecordingIo::with_csv(CsvDatasetIo::with_fallback_fs(fallback_fs));
            let recording = store.load_inputs(&name, &io)?;
            println!(
                "{} channel(s) [{}], {} sample(s) at {} Hz ({:.3} s)",
                recording.n_channels(),
                recording.channels.join(", "),
                recording.n_samples(),
                recording.fs,
                recording.duration()
            );
        }
    }
    Ok(())
}

fn cmd_list(store: &ProjectStore, json: bool) -> Result<()> {
    let projects = store.list_projects()?;
    if json {
        println!("{}", serde_json::to_string_pretty(&projects)?);
        return Ok(());
    }
    for project in &projects {
        println!(
            "{}\t{}\t{}",
            project.name,
            project.progress,
            project.path.display()
        );
    }
    Ok(())
}

fn read_pipeline(file: &Path) -> Result<PipelineSpec> {
    PipelineSpec::read_json(file)
        .with_context(|| format!("reading pipeline configuration {}", file.display()))
}

fn cmd_check(file: &Path, json: bool) -> Result<()> {
    let spec = read_pipeline(file)?;
    let errors = spec.check();
    if json {
        println!("{}", serde_json::to_string_pretty(&errors)?);
    } else if errors.is_empty() {
        for (index, step) in spec.steps().iter().enumerate() {
            println!("{:>3}  {}", index, step);
        }
    } else {
        for err in &errors {
            eprintln!("{}", err);
        }
    }
    if !errors.is_empty() {
        bail!(
            "{} has {} validation error(s)",
            file.display(),
            errors.len()
        );
    }
    Ok(())
}

fn cmd_attach(store: &ProjectStore, name: &str, file: &Path) -> Result<()> {
    let spec = read_pipeline(file)?;
    spec.validate()?;
    let doc = store.save_pipeline_settings(name, &spec)?;
    println!(
        "{}: {} preprocessing step(s), {} model(s)",
        name,
        doc.preprocessing_settings.len(),
        doc.ai_algorithms.len()
    );
    Ok(())
}
