use anyhow::{Context, Result, bail, format_err};
use clap::builder::PossibleValuesParser;
use clap::{Arg, ArgAction, ArgMatches, Command};
use dialoguer::Confirm;
use encoding::all::encodings;
use encoding::types::Encoding;
use log::Level;
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};

use evtx_decode::err::Result as EvtxResult;
use evtx_decode::{EvtxParser, OutputFormat, ParserSettings, ReadSeek, SerializedEvtxRecord};

use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::exit;

/// Tries to write a line to a given target, aborts program if fails.
macro_rules! try_writeln {
    ($($arg:tt)*) => (
        match writeln!($($arg)*) {
            Ok(_) => {},
            Err(e) => {
                eprintln!("{}", &e);
                exit(1)
            }
        }
    );
}

struct EvtxDump {
    parser_settings: ParserSettings,
    /// `-` reads the file from stdin.
    input: PathBuf,
    show_record_number: bool,
    show_headers: bool,
    show_tables: bool,
    output: Box<dyn Write>,
    verbosity_level: Option<Level>,
}

impl EvtxDump {
    pub fn from_cli_matches(matches: &ArgMatches) -> Result<Self> {
        let input = PathBuf::from(
            matches
                .get_one::<String>("INPUT")
                .context("Missing an input file")?,
        );

        let output_format = matches
            .get_one::<String>("output-format")
            .and_then(|name| OutputFormat::from_name(name))
            .unwrap_or_default();

        let num_threads = *matches.get_one::<usize>("num-threads").unwrap_or(&0);
        let num_threads = match (cfg!(feature = "multithreading"), num_threads) {
            (true, number) => number,
            (false, 1) => 1,
            (false, _) => {
                eprintln!(
                    "turned on threads, but library was compiled without `multithreading` feature! using fallback sync iterator"
                );
                1
            }
        };

        let verbosity_level = match matches.get_count("verbose") {
            0 => None,
            1 => Some(Level::Info),
            2 => Some(Level::Debug),
            3 => Some(Level::Trace),
            _ => {
                eprintln!("using more than  -vvv does not affect verbosity level");
                Some(Level::Trace)
            }
        };

        let ansi_codec_name = matches
            .get_one::<String>("ansi-codec")
            .map(String::as_str)
            .unwrap_or("windows-1252");
        let ansi_codec = encodings()
            .iter()
            .find(|c| c.name() == ansi_codec_name)
            .ok_or_else(|| format_err!("Unknown ansi codec `{ansi_codec_name}`"))?;

        let output: Box<dyn Write> = match matches.get_one::<String>("output-target") {
            Some(path) => {
                let no_confirm = matches.get_flag("no-confirm-overwrite");
                match Self::create_output_file(path, !no_confirm) {
                    Ok(f) => Box::new(f),
                    Err(e) => {
                        eprintln!(
                            "An error occurred while creating output file at `{path}` - `{e}`"
                        );
                        exit(1)
                    }
                }
            }
            None => Box::new(io::stdout()),
        };

        Ok(EvtxDump {
            parser_settings: ParserSettings::new()
                .num_threads(num_threads)
                .validate_checksums(matches.get_flag("validate-checksums"))
                .output_format(output_format)
                .event_id_filter(matches.get_one::<u16>("event-id").copied())
                .resolve_messages(matches.get_flag("resolve-messages"))
                .ansi_codec(*ansi_codec),
            input,
            show_record_number: !matches.get_flag("no-show-record-number"),
            show_headers: matches.get_flag("headers"),
            show_tables: matches.get_flag("tables"),
            output,
            verbosity_level,
        })
    }

    /// Main entry point for `EvtxDump`
    pub fn run(&mut self) -> Result<()> {
        self.try_to_initialize_logging();

        if self.input.as_os_str() == "-" {
            let mut buffer = Vec::new();
            io::stdin()
                .read_to_end(&mut buffer)
                .context("Failed to read input from stdin")?;
            let parser = match EvtxParser::from_buffer(buffer) {
                Ok(parser) => parser,
                Err(e) => {
                    eprintln!("Failed to parse input from stdin.\n\tcaused by: {e}");
                    exit(1)
                }
            };
            return self.dump(parser);
        }

        let parser = match EvtxParser::from_path(&self.input) {
            Ok(parser) => parser,
            Err(e) => {
                eprintln!(
                    "Failed to open file {}.\n\tcaused by: {}",
                    self.input.display(),
                    &e
                );
                exit(1)
            }
        };

        self.dump(parser)
    }

    fn dump<T: ReadSeek>(&mut self, parser: EvtxParser<T>) -> Result<()> {
        let mut parser = parser.with_configuration(self.parser_settings.clone());

        if self.show_headers {
            try_writeln!(self.output, "{}", parser.header());
            for (chunk_number, chunk) in parser.chunks().enumerate() {
                match chunk {
                    Ok(chunk) => {
                        try_writeln!(
                            self.output,
                            "{}",
                            chunk.header.describe(chunk_number as u64)
                        );
                        if self.show_tables {
                            for line in chunk.describe_tables() {
                                try_writeln!(self.output, "{}", line);
                            }
                        }
                    }
                    Err(e) => eprintln!("{e}"),
                }
            }
            return Ok(());
        }

        for record in parser.records_xml() {
            self.dump_record(record);
        }

        self.output.flush().context("Failed to flush output")?;
        Ok(())
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
                match Confirm::new()
                    .with_prompt(format!(
                        "Are you sure you want to override output file at {}",
                        p.display()
                    ))
                    .default(false)
                    .interact()
                {
                    Ok(true) => Ok(File::create(p)?),
                    Ok(false) => bail!("Cancelled"),
                    Err(e) => bail!(
                        "Failed to write confirmation prompt to term caused by\n{}",
                        e
                    ),
                }
            } else {
                Ok(File::create(p)?)
            }
        } else {
            // Ok to assume p is not an existing directory
            match p.parent() {
                Some(parent) => {
                    if !parent.as_os_str().is_empty() && !parent.exists() {
                        fs::create_dir_all(parent)?;
                    }
                    Ok(File::create(p)?)
                }
                None => bail!("Output file cannot be root."),
            }
        }
    }

    fn dump_record(&mut self, record: EvtxResult<SerializedEvtxRecord<String>>) {
        match record {
            Ok(r) => {
                if self.show_record_number {
                    try_writeln!(self.output, "Record {}", r.event_record_id);
                }
                try_writeln!(self.output, "{}", r.data);
            }
            Err(e) => eprintln!("{e}"),
        }
    }

    fn try_to_initialize_logging(&self) {
        if let Some(level) = self.verbosity_level {
            if let Err(e) = TermLogger::init(
                level.to_level_filter(),
                Config::default(),
                TerminalMode::Stderr,
                ColorChoice::Auto,
            ) {
                eprintln!("Failed to initialize logging: {e}");
            }
        }
    }
}

fn command() -> Command {
    Command::new("evtx_dump")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Utility to decode EVTX files into XML")
        .arg(
            Arg::new("INPUT")
                .required(true)
                .help("Path to an EVTX file, or `-` to read it from stdin."),
        )
        .arg(
            Arg::new("num-threads")
                .short('t')
                .long("threads")
                .default_value("0")
                .value_parser(clap::value_parser!(usize))
                .help("Sets the number of worker threads, defaults to number of CPU cores."),
        )
        .arg(
            Arg::new("output-format")
                .short('o')
                .long("format")
                .value_parser(["pretty", "compact", "flat"])
                .default_value("pretty")
                .help("Sets the output format")
                .long_help(
                    "Sets the output format:
    \"pretty\"  - indented XML, one tag or text per line.
    \"compact\" - the same XML on a single line per record.
    \"flat\"    - `element: text` and `element.attribute: value` lines.",
                ),
        )
        .arg(
            Arg::new("event-id")
                .long("event-id")
                .value_parser(clap::value_parser!(u16))
                .value_name("ID")
                .help("Only print records whose Event/System/EventID equals ID."),
        )
        .arg(
            Arg::new("output-target")
                .long("output")
                .short('f')
                .action(ArgAction::Set)
                .help(
                    "Writes output to the file specified instead of stdout, errors will still be printed to stderr. \
                     Will ask for confirmation before overwriting files, to allow overwriting, pass `--no-confirm-overwrite`. \
                     Will create parent directories if needed.",
                ),
        )
        .arg(
            Arg::new("no-confirm-overwrite")
                .long("no-confirm-overwrite")
                .action(ArgAction::SetTrue)
                .help("When set, will not ask for confirmation before overwriting files, useful for automation"),
        )
        .arg(
            Arg::new("validate-checksums")
                .long("validate-checksums")
                .action(ArgAction::SetTrue)
                .help(
                    "When set, chunks with invalid checksums will not be parsed. \
                     Usually dirty files have bad checksums, so using this flag will result in fewer records.",
                ),
        )
        .arg(
            Arg::new("no-show-record-number")
                .long("dont-show-record-number")
                .action(ArgAction::SetTrue)
                .help("When set, `Record <id>` will not be printed."),
        )
        .arg(
            Arg::new("resolve-messages")
                .long("resolve-messages")
                .action(ArgAction::SetTrue)
                .help("When set, `%%NNNN` values are replaced by their message text."),
        )
        .arg(
            Arg::new("headers")
                .long("headers")
                .action(ArgAction::SetTrue)
                .help("Print the file header and one summary line per chunk instead of records."),
        )
        .arg(
            Arg::new("tables")
                .long("tables")
                .action(ArgAction::SetTrue)
                .requires("headers")
                .help("With `--headers`, also list the shared name and template tables of each chunk."),
        )
        .arg(
            Arg::new("ansi-codec")
                .long("ansi-codec")
                .value_parser(PossibleValuesParser::new(
                    encodings()
                        .iter()
                        .filter(|&e| e.raw_decoder().is_ascii_compatible())
                        .map(|e| e.name())
                        .collect::<Vec<&'static str>>(),
                ))
                .default_value(encoding::all::WINDOWS_1252.name())
                .help("When set, controls the codec of ansi encoded strings the file."),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .action(ArgAction::Count)
                .help("-v - info, -vv - debug, -vvv - trace. Trace output is extremely verbose."),
        )
}

fn main() -> Result<()> {
    let matches = command().get_matches();

    let mut app = EvtxDump::from_cli_matches(&matches)?;
    app.run()
}
