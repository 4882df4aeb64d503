use anyhow::Context;
use clap::{value_parser, Arg, Command, ValueHint};
use locus_cli::input::Input;
use locus_cli::runner::Runner;
use rayon::ThreadPoolBuilder;

fn main() -> anyhow::Result<()> {
    env_logger::Builder::default()
        .filter_level(log::LevelFilter::Error)
        .parse_env(env_logger::Env::default().filter_or("LOCUS_LOG", "error,locus=info"))
        .init();

    let matches = Command::new("locus")
        .version(clap::crate_version!())
        .author("Locus developers")
        .about("Localize modifications on candidate peptide-spectrum matches")
        .arg(
            Arg::new("parameters")
                .required(true)
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help("Path to configuration parameters (JSON file)")
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("mgf")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the MGF file to process. Overrides the MGF file listed in the \
                     configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("candidates")
                .short('c')
                .long("candidates")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path to the candidate file (JSON). Overrides the candidate file \
                     specified in the configuration file.",
                )
                .value_hint(ValueHint::FilePath),
        )
        .arg(
            Arg::new("output_directory")
                .short('o')
                .long("output_directory")
                .value_parser(clap::builder::NonEmptyStringValueParser::new())
                .help(
                    "Path where results will be written. \
                     Overrides the directory specified in the configuration file.",
                )
                .value_hint(ValueHint::DirPath),
        )
        .arg(
            Arg::new("threads")
                .long("threads")
                .value_parser(value_parser!(u16).range(1..))
                .help("Number of worker threads (default = # of CPUs)")
                .value_hint(ValueHint::Other),
        )
        .help_template(
            "{usage-heading} {usage}\n\n\
             {about-with-newline}\n\
             Written by {author-with-newline}Version {version}\n\n\
             {all-args}{after-help}",
        )
        .get_matches();

    let threads = matches
        .get_one::<u16>("threads")
        .map(|&n| n as usize)
        .unwrap_or_else(num_cpus::get);
    ThreadPoolBuilder::new()
        .num_threads(threads)
        .build_global()
        .context("Failed to configure thread pool")?;

    let input = Input::from_arguments(matches)?;

    let runner = input.build().and_then(Runner::new)?;
    runner.run()?;

    Ok(())
}
