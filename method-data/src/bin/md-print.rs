use anyhow::{Context, Result};
use clap::Parser;
use methoddata::print::print_data;
use methoddata::{
    Address, MappedMemory, ObjectResolver, ProfileLayout, ProfileWalker, SymbolTable, TypeSchema,
    VmResolver,
};
use std::fs;
use std::io::{self, Write};
use std::path::PathBuf;
use tracing_subscriber::filter::EnvFilter;

/// Prints a human readable version of a method profile found in a memory image.
#[derive(Parser, Debug)]
#[command(version, about, long_about = None)]
struct Args {
    /// Type schema (JSON) describing the target build.
    #[arg(short, long)]
    schema: PathBuf,

    /// Memory image to map, as `<BASE>=<FILE>`. May be repeated.
    #[arg(short, long = "image", value_parser = parse_image, required = true)]
    images: Vec<(Address, PathBuf)>,

    /// Address of the `ciMethodData` to print.
    #[arg(short, long)]
    address: Address,

    /// Symbol map (JSON) for klass and method names. Names are read from the images otherwise.
    #[arg(long)]
    symbols: Option<PathBuf>,

    /// Output file or '-' to use stdout.
    #[arg(short, long, default_value_t = String::from("-"))]
    output: String,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_env("MD_LOG"))
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();

    let schema = TypeSchema::from_path(&args.schema)
        .with_context(|| format!("unable to load schema {}", args.schema.display()))?;
    let layout = ProfileLayout::from_schema(&schema)?;

    let mut memory = MappedMemory::new();
    for (base, path) in &args.images {
        // The images are snapshots and are not written while we run.
        unsafe { memory.map(*base, path) }
            .with_context(|| format!("unable to map {}", path.display()))?;
    }

    let resolver: Box<dyn ObjectResolver + '_> = match &args.symbols {
        Some(path) => Box::new(SymbolTable::from_path(path)?),
        None => Box::new(VmResolver::new(&memory, &schema)?),
    };

    let walker = ProfileWalker::read(&memory, &layout, args.address)
        .with_context(|| format!("unable to read ciMethodData at {}", args.address))?;

    let mut output = open_output(args.output.as_str())?;
    print_data(&walker, resolver.as_ref(), &mut output)?;
    output.flush()?;
    Ok(())
}

fn parse_image(arg: &str) -> Result<(Address, PathBuf), String> {
    let (base, path) = arg
        .split_once('=')
        .ok_or_else(|| format!("expected <BASE>=<FILE>, found {arg:?}"))?;
    let base = base
        .parse::<Address>()
        .map_err(|e| format!("invalid base address {base:?}: {e}"))?;
    Ok((base, PathBuf::from(path)))
}

fn open_output(output: &str) -> io::Result<Box<dyn Write>> {
    if output == "-" {
        return Ok(Box::new(io::stdout().lock()));
    }
    Ok(Box::new(fs::File::create(output)?))
}
