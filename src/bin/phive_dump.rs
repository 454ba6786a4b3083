use anyhow::{Context, Result, bail, format_err};
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use indoc::indoc;
use log::{LevelFilter, debug};
use serde::Serialize;

use phive::{FileType, ParserSettings, PhiveFile, RootLevelContainer, TypeCategory};

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum DumpCommand {
    Info,
    Types,
    Roots,
    Check,
    ExtractData,
}

impl DumpCommand {
    fn from_name(name: &str) -> Option<Self> {
        match name {
            "info" => Some(DumpCommand::Info),
            "types" => Some(DumpCommand::Types),
            "roots" => Some(DumpCommand::Roots),
            "check" => Some(DumpCommand::Check),
            "extract-data" => Some(DumpCommand::ExtractData),
            _ => None,
        }
    }
}

struct PhiveDump {
    command: DumpCommand,
    parser_settings: ParserSettings,
    input: PathBuf,
    output: Option<PathBuf>,
    stored: bool,
    confirm_overwrite: bool,
    verbosity_level: Option<LevelFilter>,
}

#[derive(Debug, Serialize)]
struct TypeLine<'a> {
    type_index: u32,
    name: &'a str,
    category: TypeCategory,
}

#[derive(Debug, Serialize)]
struct RootLine<'a> {
    name: Option<&'a str>,
    class_name: Option<&'a str>,
    offset: Option<i64>,
}

#[derive(Debug, Serialize)]
struct CheckReport {
    relocations: usize,
    lossy_array_counts: Vec<usize>,
    relocation_round_trip: bool,
    reserialized_identical: bool,
    reserialized_size: usize,
    input_size: usize,
}

impl PhiveDump {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        // Global arguments propagate down, so everything is read from the subcommand matches.
        let (name, sub) = matches
            .subcommand()
            .ok_or_else(|| format_err!("a subcommand is required"))?;
        let command =
            DumpCommand::from_name(name).ok_or_else(|| format_err!("unknown subcommand `{name}`"))?;

        let input = PathBuf::from(
            sub.get_one::<String>("INPUT")
                .context("INPUT is a required argument")?,
        );

        let output = sub.get_one::<String>("output").map(PathBuf::from);
        if command == DumpCommand::ExtractData && output.is_none() {
            bail!("`extract-data` writes binary data and needs `--output <PATH>`");
        }

        let stored = sub
            .try_get_one::<bool>("stored")
            .ok()
            .flatten()
            .copied()
            .unwrap_or(false);

        let expected_file_type = match sub.get_one::<String>("file-type").map(String::as_str) {
            None | Some("cloth") => Some(FileType::Cloth),
            Some("shape") => Some(FileType::Shape),
            Some("navmesh") => Some(FileType::NavMesh),
            Some("static-compound") => Some(FileType::StaticCompound),
            Some("any") => None,
            Some(other) => bail!("unknown file type `{other}`"),
        };

        let verbosity_level = match sub.get_count("verbose") {
            0 => None,
            1 => Some(LevelFilter::Info),
            2 => Some(LevelFilter::Debug),
            3 => Some(LevelFilter::Trace),
            _ => {
                eprintln!("using more than  -vvv does not affect verbosity level");
                Some(LevelFilter::Trace)
            }
        };

        Ok(PhiveDump {
            command,
            parser_settings: ParserSettings::new()
                .expected_file_type(expected_file_type)
                .strict_version(!sub.get_flag("lenient-version")),
            input,
            output,
            stored,
            confirm_overwrite: !sub.get_flag("no-confirm-overwrite"),
            verbosity_level,
        })
    }

    /// Main entry point for `PhiveDump`
    pub fn run(&self) -> Result<()> {
        self.try_to_initialize_logging();

        let file = PhiveFile::from_path_with(&self.input, &self.parser_settings)
            .with_context(|| format!("Failed to load {}", self.input.display()))?;
        debug!("loaded {}", self.input.display());

        match self.command {
            DumpCommand::Info => self.write_json(&file.summary()),
            DumpCommand::Types => {
                let types: Vec<TypeLine<'_>> = file
                    .catalog()
                    .iter()
                    .map(|t| TypeLine {
                        type_index: t.type_index,
                        name: &t.name,
                        category: t.category,
                    })
                    .collect();
                self.write_json(&types)
            }
            DumpCommand::Roots => {
                let root: RootLevelContainer = file
                    .root_level_container()
                    .context("Failed to read the root-level container")?;
                let roots: Vec<RootLine<'_>> = root
                    .named_variants
                    .iter()
                    .map(|v| RootLine {
                        name: v.name.as_str(),
                        class_name: v.class_name.as_str(),
                        offset: v.variant.target(),
                    })
                    .collect();
                self.write_json(&roots)
            }
            DumpCommand::Check => self.check(&file),
            DumpCommand::ExtractData => {
                let data = if self.stored {
                    file.stored_data()
                        .context("Failed to reverse the relocation")?
                } else {
                    file.resolved_data().to_vec()
                };
                self.write_bytes(&data)
            }
        }
    }

    fn check(&self, file: &PhiveFile) -> Result<()> {
        let input = fs::read(&self.input)
            .with_context(|| format!("Failed to read {}", self.input.display()))?;
        let relocation_round_trip = file.verify_round_trip();
        let reserialized = file.to_bytes().context("Failed to re-serialize")?;

        let report = CheckReport {
            relocations: file.relocations().len(),
            lossy_array_counts: file.relocations().lossy_offsets(),
            relocation_round_trip: relocation_round_trip.is_ok(),
            reserialized_identical: reserialized == input,
            reserialized_size: reserialized.len(),
            input_size: input.len(),
        };
        self.write_json(&report)?;

        relocation_round_trip.context("Relocation round trip failed")?;
        if !report.reserialized_identical {
            bail!(
                "Re-serialized container differs from the input ({} vs {} bytes)",
                report.reserialized_size,
                report.input_size
            );
        }
        Ok(())
    }

    fn write_json<T: Serialize>(&self, value: &T) -> Result<()> {
        let mut text = serde_json::to_string_pretty(value).context("Failed to serialize output")?;
        text.push('\n');
        self.write_bytes(text.as_bytes())
    }

    fn write_bytes(&self, bytes: &[u8]) -> Result<()> {
        match &self.output {
            Some(path) => {
                let mut f = Self::create_output_file(path, self.confirm_overwrite)?;
                f.write_all(bytes)
                    .with_context(|| format!("Failed to write to {}", path.display()))
            }
            None => io::stdout()
                .lock()
                .write_all(bytes)
                .context("Failed to write to stdout"),
        }
    }

    /// If `prompt` is passed, will display a confirmation prompt before overwriting files.
    fn create_output_file(path: impl AsRef<Path>, prompt: bool) -> Result<File> {
        let p = path.as_ref();

        if p.is_dir() {
            bail!(
                "There is a directory at {}, refusing to overwrite",
                p.display()
            );
        }

        if p.exists() {
            if prompt {
                let confirmed = Confirm::new()
                    .with_prompt(format!(
                        "Are you sure you want to override output file at {}",
                        p.display()
                    ))
                    .default(false)
                    .interact()
                    .context("Failed to write confirmation prompt to term")?;
                if !confirmed {
                    bail!("Cancelled");
                }
            }
            return File::create(p).with_context(|| format!("Failed to create {}", p.display()));
        }

        // Ok to assume p is not an existing directory
        match p.parent() {
            Some(parent) => {
                if !parent.as_os_str().is_empty() && !parent.exists() {
                    fs::create_dir_all(parent)
                        .with_context(|| format!("Failed to create {}", parent.display()))?;
                }
                File::create(p).with_context(|| format!("Failed to create {}", p.display()))
            }
            None => bail!("Output file cannot be root."),
        }
    }

    fn try_to_initialize_logging(&self) {
        if let Some(level) = self.verbosity_level {
            if let Err(e) =
                simplelog::WriteLogger::init(level, simplelog::Config::default(), io::stderr())
            {
                eprintln!("Failed to initialize logging: {e:?}");
            }
        }
    }
}

fn input_arg() -> Arg {
    Arg::new("INPUT")
        .required(true)
        .value_name("FILE")
        .help("Path to a Phive container")
}

fn cli() -> Command {
    Command::new("phive_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Utility to inspect Phive / TAG0 containers")
        .subcommand_required(true)
        .arg_required_else_help(true)
        .subcommand(
            Command::new("info")
                .about("Print the header, section layout and counts as JSON")
                .arg(input_arg()),
        )
        .subcommand(
            Command::new("types")
                .about("Print the named types and their categories as JSON")
                .arg(input_arg()),
        )
        .subcommand(
            Command::new("roots")
                .about("Print the root-level named variants as JSON")
                .arg(input_arg()),
        )
        .subcommand(
            Command::new("check")
                .about("Verify the relocation round trip and re-serialization")
                .long_about(indoc!(
                    r#"
                    Verify that the container survives a load/save cycle.

                    Reverses the relocation of the DATA section and compares it with the stored
                    bytes, then re-serializes the whole container and compares it with the input.
                    Exits with a non-zero status when either comparison fails.
                "#
                ))
                .arg(input_arg()),
        )
        .subcommand(
            Command::new("extract-data")
                .about("Write the DATA section to `--output`")
                .arg(input_arg())
                .arg(
                    Arg::new("stored")
                        .long("stored")
                        .action(ArgAction::SetTrue)
                        .help("Write the stored (index) form instead of the resolved form"),
                ),
        )
        .arg(
            Arg::new("output")
                .long("output")
                .short('f')
                .global(true)
                .value_name("PATH")
                .help(indoc!(
                    "Writes output to the file specified instead of stdout, errors will still be printed to stderr.
                     Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`
                     Will create parent directories if needed."
                )),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .arg(
            Arg::new("file-type")
                .long("file-type")
                .global(true)
                .value_parser(["cloth", "shape", "navmesh", "static-compound", "any"])
                .help("Expected file type, defaults to cloth"),
        )
        .arg(
            Arg::new("lenient-version")
                .long("lenient-version")
                .global(true)
                .action(ArgAction::SetTrue)
                .help("Accept SDK versions other than 20220100 with a warning"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .global(true)
                .action(ArgAction::Count)
                .help(indoc!(r#"
                -v  - info,
                -vv - debug,
                -vvv - trace
                NOTE: trace output is only available in debug builds, as it is extremely verbose."#)),
        )
}

fn main() {
    let matches = cli().get_matches();

    let result = PhiveDump::from_cli_matches(&matches).and_then(|app| app.run());
    if let Err(e) = result {
        eprintln!("{e:?}");
        exit(1);
    }
}
