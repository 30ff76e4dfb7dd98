//! `copernicusmarine` command line interface.

use anyhow::Result;
use clap::{Args, Parser, Subcommand, ValueEnum};
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

use copernicusmarine::{
    CoordinatesSelectionMethod, DescribeRequest, Error, FileFormat, GetRequest, LoginRequest,
    SplitOn, SubsetRequest, TemplateKind, VerticalAxis, create_template, response_to_json,
};

#[derive(Parser, Debug)]
#[command(name = "copernicusmarine", version)]
#[command(about = "Describe, download and subset Copernicus Marine datasets")]
struct Cli {
    /// Logging verbosity (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "INFO", ignore_case = true, global = true)]
    log_level: LogLevel,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
#[value(rename_all = "SCREAMING_SNAKE_CASE")]
enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
    Critical,
    Quiet,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print the catalogue, or part of it, as JSON
    Describe(DescribeArgs),
    /// Download original files of a dataset
    Get(GetArgs),
    /// Extract a subset of an ARCO dataset into a Zarr store
    Subset(SubsetCommand),
    /// Check or store credentials
    Login(LoginArgs),
}

#[derive(Args, Debug)]
struct SessionArgs {
    /// Maximum number of parallel requests
    #[arg(long, default_value_t = 15)]
    max_concurrent_requests: usize,

    #[arg(long)]
    disable_progress_bar: bool,

    /// Use the staging environment
    #[arg(long, hide = true)]
    staging: bool,

    /// Do not read or write the metadata cache
    #[arg(long)]
    no_metadata_cache: bool,

    /// Refresh the metadata cache
    #[arg(long)]
    overwrite_metadata_cache: bool,
}

#[derive(Args, Debug)]
struct CredentialArgs {
    #[arg(long, env = "COPERNICUSMARINE_SERVICE_USERNAME")]
    username: Option<String>,

    #[arg(long, env = "COPERNICUSMARINE_SERVICE_PASSWORD", hide_env_values = true)]
    password: Option<String>,

    /// Credentials file to read instead of the configuration directory one
    #[arg(long)]
    credentials_file: Option<PathBuf>,
}

#[derive(Args, Debug)]
struct DatasetArgs {
    #[arg(short = 'i', long)]
    dataset_id: Option<String>,

    /// Version label (default: latest released)
    #[arg(long)]
    dataset_version: Option<String>,

    #[arg(long)]
    dataset_part: Option<String>,
}

#[derive(Args, Debug)]
struct DescribeArgs {
    #[arg(long)]
    include_description: bool,

    #[arg(long)]
    include_datasets: bool,

    #[arg(long)]
    include_keywords: bool,

    /// Keep every version, not only the selected one
    #[arg(long)]
    include_versions: bool,

    #[arg(short = 'a', long)]
    include_all: bool,

    /// Keep products containing this text (repeatable)
    #[arg(short = 'c', long)]
    contains: Vec<String>,

    #[arg(short = 'p', long)]
    product_id: Option<String>,

    #[arg(short = 'i', long)]
    dataset_id: Option<String>,

    /// Comma separated fields to keep
    #[arg(short = 'r', long, value_delimiter = ',')]
    returned_fields: Vec<String>,

    /// Comma separated fields to drop
    #[arg(short = 'e', long, value_delimiter = ',')]
    returned_fields_exclude: Vec<String>,

    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Args, Debug)]
struct GetArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    #[command(flatten)]
    credentials: CredentialArgs,

    #[arg(short = 'o', long, default_value = ".")]
    output_directory: PathBuf,

    /// Write every file directly in the output directory
    #[arg(short = 'n', long)]
    no_directories: bool,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    skip_existing: bool,

    /// Service name or short name (only original-files)
    #[arg(short = 's', long)]
    service: Option<String>,

    /// Glob on the file paths relative to the dataset
    #[arg(long)]
    filter: Option<String>,

    #[arg(long)]
    regex: Option<String>,

    /// .txt or .csv list of files to download
    #[arg(long)]
    file_list: Option<PathBuf>,

    /// Write the selected files to this .txt or .csv file instead of downloading
    #[arg(long)]
    create_file_list: Option<String>,

    /// Only download files missing locally or changed remotely
    #[arg(long)]
    sync: bool,

    /// Like --sync, also deleting local files absent from the remote
    #[arg(long)]
    sync_delete: bool,

    /// Also download the index files of in-situ datasets
    #[arg(long)]
    index_parts: bool,

    #[arg(long)]
    dry_run: bool,

    /// Comma separated response fields to print ("all" for everything)
    #[arg(short = 'r', long, value_delimiter = ',')]
    response_fields: Vec<String>,

    /// JSON file with request values
    #[arg(long)]
    request_file: Option<PathBuf>,

    /// Write get_template.json in the current directory and exit
    #[arg(long)]
    create_template: bool,

    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Args, Debug)]
#[command(args_conflicts_with_subcommands = true)]
struct SubsetCommand {
    #[command(subcommand)]
    split: Option<SubsetSubcommand>,

    #[command(flatten)]
    args: SubsetArgs,
}

#[derive(Subcommand, Debug)]
enum SubsetSubcommand {
    /// Subset into one output per period or per variable
    SplitOn {
        #[arg(long, value_enum)]
        on: SplitOn,

        #[command(flatten)]
        args: SubsetArgs,
    },
}

#[derive(Args, Debug)]
struct SubsetArgs {
    #[command(flatten)]
    dataset: DatasetArgs,

    #[command(flatten)]
    credentials: CredentialArgs,

    /// Variable short or standard name (repeatable)
    #[arg(short = 'v', long = "variable")]
    variables: Vec<String>,

    #[arg(short = 'x', long, allow_negative_numbers = true)]
    minimum_longitude: Option<f64>,

    #[arg(short = 'X', long, allow_negative_numbers = true)]
    maximum_longitude: Option<f64>,

    #[arg(short = 'y', long, allow_negative_numbers = true)]
    minimum_latitude: Option<f64>,

    #[arg(short = 'Y', long, allow_negative_numbers = true)]
    maximum_latitude: Option<f64>,

    /// Positive downwards
    #[arg(short = 'z', long, allow_negative_numbers = true)]
    minimum_depth: Option<f64>,

    #[arg(short = 'Z', long, allow_negative_numbers = true)]
    maximum_depth: Option<f64>,

    #[arg(long, value_enum, default_value_t)]
    vertical_axis: VerticalAxis,

    /// YYYY, YYYY-MM, YYYY-MM-DD, YYYY-MM-DDTHH:MM:SS or "now"
    #[arg(short = 't', long)]
    start_datetime: Option<String>,

    #[arg(short = 'T', long)]
    end_datetime: Option<String>,

    /// Platform id of sparse datasets (repeatable)
    #[arg(short = 'p', long = "platform-id")]
    platform_ids: Vec<String>,

    #[arg(long, value_enum, default_value_t)]
    coordinates_selection_method: CoordinatesSelectionMethod,

    #[arg(short = 'f', long)]
    output_filename: Option<String>,

    #[arg(short = 'o', long, default_value = ".")]
    output_directory: PathBuf,

    #[arg(long, value_enum, default_value_t)]
    file_format: FileFormat,

    /// Service name or short name (arco-geo-series, arco-time-series, ...)
    #[arg(short = 's', long)]
    service: Option<String>,

    #[arg(long)]
    overwrite: bool,

    #[arg(long)]
    skip_existing: bool,

    #[arg(long)]
    dry_run: bool,

    /// Fail instead of warning when the dataset is being updated
    #[arg(long)]
    raise_if_updating: bool,

    /// Comma separated response fields to print ("all" for everything)
    #[arg(short = 'r', long, value_delimiter = ',')]
    response_fields: Vec<String>,

    /// JSON file with request values
    #[arg(long)]
    request_file: Option<PathBuf>,

    /// Write subset_template.json in the current directory and exit
    #[arg(long)]
    create_template: bool,

    #[command(flatten)]
    session: SessionArgs,
}

#[derive(Args, Debug)]
struct LoginArgs {
    #[arg(long)]
    username: Option<String>,

    #[arg(long)]
    password: Option<String>,

    /// Where to write the credentials file
    #[arg(long)]
    configuration_file_directory: Option<PathBuf>,

    #[arg(long)]
    overwrite_configuration_file: bool,

    /// Only check the credentials found, without writing anything
    #[arg(long)]
    check_credentials_valid: bool,

    #[arg(long)]
    skip_if_user_logged_in: bool,
}

impl From<DescribeArgs> for DescribeRequest {
    fn from(a: DescribeArgs) -> Self {
        Self {
            include_description: a.include_description,
            include_datasets: a.include_datasets,
            include_keywords: a.include_keywords,
            include_versions: a.include_versions,
            include_all: a.include_all,
            contains: a.contains,
            product_id: a.product_id,
            dataset_id: a.dataset_id,
            returned_fields: a.returned_fields,
            returned_fields_exclude: a.returned_fields_exclude,
            max_concurrent_requests: a.session.max_concurrent_requests,
            disable_progress_bar: a.session.disable_progress_bar,
            staging: a.session.staging,
            no_metadata_cache: a.session.no_metadata_cache,
            overwrite_metadata_cache: a.session.overwrite_metadata_cache,
        }
    }
}

impl From<GetArgs> for GetRequest {
    fn from(a: GetArgs) -> Self {
        Self {
            dataset_id: a.dataset.dataset_id,
            dataset_version: a.dataset.dataset_version,
            dataset_part: a.dataset.dataset_part,
            username: a.credentials.username,
            password: a.credentials.password,
            credentials_file: a.credentials.credentials_file,
            output_directory: a.output_directory,
            no_directories: a.no_directories,
            overwrite: a.overwrite,
            skip_existing: a.skip_existing,
            service: a.service,
            filter: a.filter,
            regex: a.regex,
            file_list: a.file_list,
            create_file_list: a.create_file_list,
            sync: a.sync,
            sync_delete: a.sync_delete,
            index_parts: a.index_parts,
            dry_run: a.dry_run,
            max_concurrent_requests: a.session.max_concurrent_requests,
            disable_progress_bar: a.session.disable_progress_bar,
            staging: a.session.staging,
            no_metadata_cache: a.session.no_metadata_cache,
            overwrite_metadata_cache: a.session.overwrite_metadata_cache,
            response_fields: a.response_fields,
            request_file: a.request_file,
        }
    }
}

impl From<SubsetArgs> for SubsetRequest {
    fn from(a: SubsetArgs) -> Self {
        Self {
            dataset_id: a.dataset.dataset_id,
            dataset_version: a.dataset.dataset_version,
            dataset_part: a.dataset.dataset_part,
            username: a.credentials.username,
            password: a.credentials.password,
            credentials_file: a.credentials.credentials_file,
            variables: a.variables,
            minimum_longitude: a.minimum_longitude,
            maximum_longitude: a.maximum_longitude,
            minimum_latitude: a.minimum_latitude,
            maximum_latitude: a.maximum_latitude,
            minimum_depth: a.minimum_depth,
            maximum_depth: a.maximum_depth,
            vertical_axis: a.vertical_axis,
            start_datetime: a.start_datetime,
            end_datetime: a.end_datetime,
            platform_ids: a.platform_ids,
            coordinates_selection_method: a.coordinates_selection_method,
            output_filename: a.output_filename,
            output_directory: a.output_directory,
            file_format: a.file_format,
            service: a.service,
            overwrite: a.overwrite,
            skip_existing: a.skip_existing,
            dry_run: a.dry_run,
            raise_if_updating: a.raise_if_updating,
            max_concurrent_requests: a.session.max_concurrent_requests,
            disable_progress_bar: a.session.disable_progress_bar,
            staging: a.session.staging,
            no_metadata_cache: a.session.no_metadata_cache,
            overwrite_metadata_cache: a.session.overwrite_metadata_cache,
            response_fields: a.response_fields,
            request_file: a.request_file,
        }
    }
}

impl From<LoginArgs> for LoginRequest {
    fn from(a: LoginArgs) -> Self {
        Self {
            username: a.username,
            password: a.password,
            configuration_file_directory: a.configuration_file_directory,
            overwrite_configuration_file: a.overwrite_configuration_file,
            check_credentials_valid: a.check_credentials_valid,
            skip_if_user_logged_in: a.skip_if_user_logged_in,
        }
    }
}

fn init_logging(level: LogLevel) {
    let directive = match level {
        LogLevel::Debug => "copernicusmarine=debug",
        LogLevel::Info => "copernicusmarine=info",
        LogLevel::Warn => "copernicusmarine=warn",
        LogLevel::Error | LogLevel::Critical => "copernicusmarine=error",
        LogLevel::Quiet => "off",
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(directive));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn print_json<T: Serialize>(response: &T, response_fields: &[String]) -> Result<()> {
    let value = response_to_json(response, response_fields)?;
    println!("{}", serde_json::to_string_pretty(&value)?);
    Ok(())
}

fn write_template(kind: TemplateKind) -> Result<bool> {
    let path = create_template(kind, Path::new("."))?;
    info!(path = %path.display(), "template created");
    Ok(true)
}

fn run(command: Command) -> Result<bool> {
    match command {
        Command::Describe(args) => {
            let value = copernicusmarine::describe(args.into())?;
            println!("{}", serde_json::to_string_pretty(&value)?);
            Ok(true)
        }
        Command::Get(args) => {
            if args.create_template {
                return write_template(TemplateKind::Get);
            }
            let request = GetRequest::from(args);
            let fields = request.response_fields.clone();
            let response = copernicusmarine::get(request)?;
            print_json(&response, &fields)?;
            Ok(true)
        }
        Command::Subset(SubsetCommand {
            split: Some(SubsetSubcommand::SplitOn { on, args }),
            ..
        }) => {
            let request = SubsetRequest::from(args);
            let fields = request.response_fields.clone();
            let responses = copernicusmarine::subset_split_on(request, on)?;
            let values = responses
                .iter()
                .map(|r| response_to_json(r, &fields))
                .collect::<Result<Vec<_>>>()?;
            println!("{}", serde_json::to_string_pretty(&values)?);
            Ok(true)
        }
        Command::Subset(SubsetCommand { args, .. }) => {
            if args.create_template {
                return write_template(TemplateKind::Subset);
            }
            let request = SubsetRequest::from(args);
            let fields = request.response_fields.clone();
            let response = copernicusmarine::subset(request)?;
            print_json(&response, &fields)?;
            Ok(true)
        }
        Command::Login(args) => copernicusmarine::login(args.into()),
    }
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_level);

    match run(cli.command) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::from(1),
        Err(err) => {
            match err.downcast_ref::<Error>() {
                Some(e) => error!("{}: {e}", e.sentence()),
                None => error!("{err:#}"),
            }
            ExitCode::from(1)
        }
    }
}
