use std::error::Error;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use apolo_image::config::Config;
use apolo_image::log::init_logger;
use apolo_image::registry::RegistryClient;
use apolo_image::repo_info::repository_image;
use apolo_image::TagOption;
use clap::{Parser, Subcommand};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "apolo-image",
    version,
    about = "Resolve platform image references",
    long_about = None
)]
struct Args {
    #[command(subcommand)]
    command: Commands,

    #[arg(
        long,
        short,
        help = "Configuration file, default to ~/.apolo/config.toml"
    )]
    config: Option<PathBuf>,

    #[arg(long, help = "Log level, overrides the configured one")]
    log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Parse an image name as the local container engine sees it
    ParseLocal { image: String },

    /// Parse a platform image reference
    ParseRemote {
        image: String,

        /// Reject explicit tags and leave the tag unset
        #[arg(long)]
        no_tag: bool,

        /// Print every component as JSON
        #[arg(long)]
        json: bool,
    },

    /// Local engine name for a platform image
    ToLocal { image: String },

    /// Platform image a local image is pushed to
    ToRemote { image: String },

    /// Registry address of a platform image
    DockerUrl { image: String },

    /// List repositories of the default cluster
    Ls,

    /// List tags of a repository
    Tags { image: String },

    /// Show the manifest digest of a tagged image
    Digest { image: String },
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();

    let config = match load_config(args.config.as_deref()) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("ERROR: {err}");
            return ExitCode::FAILURE;
        }
    };
    init_logger(args.log_level.as_deref().unwrap_or(&config.log_level()));

    match run(args.command, &config).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("ERROR: {err}");
            ExitCode::FAILURE
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<Config, Box<dyn Error>> {
    let path = match path {
        Some(path) => path.to_path_buf(),
        None => Config::default_path()?,
    };
    Ok(Config::from_file(path)?)
}

async fn run(command: Commands, config: &Config) -> Result<(), Box<dyn Error>> {
    let parser = config.parser()?;
    info!(
        cluster = %parser.context().default_cluster,
        project = %parser.context().default_project,
        "resolving against"
    );

    match command {
        Commands::ParseLocal { image } => {
            println!("{}", parser.parse_as_local_image(&image)?);
        }
        Commands::ParseRemote {
            image,
            no_tag,
            json,
        } => {
            let tag_option = if no_tag {
                TagOption::Deny
            } else {
                TagOption::Allow
            };
            let image = parser.parse_remote(&image, tag_option)?;
            if json {
                println!("{}", serde_json::to_string_pretty(&image)?);
            } else {
                println!("{image}");
            }
        }
        Commands::ToLocal { image } => {
            let image = parser.parse_as_remote_image(&image, TagOption::Allow)?;
            println!("{}", parser.convert_to_local_image(&image));
        }
        Commands::ToRemote { image } => {
            let image = parser.parse_as_local_image(&image)?;
            println!("{}", parser.convert_to_remote_image(&image)?);
        }
        Commands::DockerUrl { image } => {
            let image = parser.parse_as_remote_image(&image, TagOption::Allow)?;
            println!("{}", image.as_docker_url());
        }
        Commands::Ls => {
            let client = RegistryClient::new(parser, config.credentials());
            for image in client.ls().await? {
                println!("{image}");
            }
        }
        Commands::Tags { image } => {
            let image = repository_image(&parser, &image)?;
            let client = RegistryClient::new(parser, config.credentials());
            for image in client.tags(&image).await? {
                println!("{image}");
            }
        }
        Commands::Digest { image } => {
            let image = parser.parse_as_remote_image(&image, TagOption::Allow)?;
            let client = RegistryClient::new(parser, config.credentials());
            println!("{}", client.digest(&image).await?);
        }
    }
    Ok(())
}
