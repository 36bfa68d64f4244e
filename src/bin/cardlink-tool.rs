//! cardlink-tool: smart card utility
//!
//! Lists readers and drivers, sends raw APDUs and walks the file system of
//! the card in a reader.
//!
//! Usage:
//!   cardlink-tool -l
//!   cardlink-tool -r 0 -s 00:A4:00:00:02:3F:00 -f
//!   cardlink-tool --virtual -f --read-contents

use std::path::PathBuf;
use std::process::ExitCode;

use clap::{ArgAction, CommandFactory, Parser};
use log::{warn, LevelFilter};

use cardlink::apdu::APDU;
use cardlink::card::Atr;
use cardlink::fs::{enumerate, EntryStatus, EnumerateOptions, FileContent, FileEntry, FileTree, Path};
use cardlink::reader::{CardImage, CardPresence, Transport, VirtualTransport};
use cardlink::util::{bin_to_hex, hex_dump, hex_dump_ascii, hex_to_bin};
use cardlink::{Card, Config, Context, Error, ErrorCategory, Result};

#[derive(Parser, Debug)]
#[command(name = "cardlink-tool")]
#[command(about = "Smart card utility: readers, drivers, raw APDUs and file system listing")]
#[command(version)]
struct Args {
    /// List all configured readers
    #[arg(short = 'l', long)]
    list_readers: bool,

    /// List all installed card drivers
    #[arg(short = 'D', long)]
    list_drivers: bool,

    /// Recursively list files stored on the card
    #[arg(short = 'f', long)]
    list_files: bool,

    /// Send a custom APDU command (hex, bytes may be separated by ':')
    #[arg(short = 's', long = "send-apdu", value_name = "APDU")]
    send_apdu: Vec<String>,

    /// Print the card's ATR
    #[arg(short = 'a', long)]
    atr: bool,

    /// Use reader number N
    #[arg(short = 'r', long, value_name = "N", default_value_t = 0)]
    reader: usize,

    /// Force the use of card driver NAME
    #[arg(short = 'c', long = "card-driver", value_name = "NAME")]
    card_driver: Option<String>,

    /// Quiet operation
    #[arg(short = 'q', long)]
    quiet: bool,

    /// Debug output, may be repeated
    #[arg(short = 'd', long, action = ArgAction::Count)]
    debug: u8,

    /// Disable the file selection cache
    #[arg(long)]
    no_cache: bool,

    /// Root of the file listing
    #[arg(long, value_name = "PATH", default_value = "3F00")]
    path: String,

    /// Dump the content of every readable file while listing
    #[arg(long)]
    read_contents: bool,

    /// Use a simulated reader, with the demo card or the given card image
    #[arg(long = "virtual", value_name = "IMAGE", num_args = 0..=1)]
    virtual_card: Option<Option<PathBuf>>,

    /// Configuration file instead of the default location
    #[arg(long, value_name = "FILE")]
    config: Option<PathBuf>,
}

impl Args {
    fn card_actions(&self) -> bool {
        self.list_files || self.atr || !self.send_apdu.is_empty()
    }

    fn any_action(&self) -> bool {
        self.list_readers || self.list_drivers || self.card_actions()
    }
}

fn init_logging(debug: u8) {
    let level = match debug {
        0 => LevelFilter::Warn,
        1 => LevelFilter::Info,
        2 => LevelFilter::Debug,
        _ => LevelFilter::Trace,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .parse_default_env()
        .init();
}

fn exit_code(e: &Error) -> ExitCode {
    match e.category() {
        ErrorCategory::Input => ExitCode::from(2),
        ErrorCategory::NoCard => ExitCode::from(3),
        _ => ExitCode::FAILURE,
    }
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_logging(args.debug);

    if !args.any_action() {
        Args::command().print_help().ok();
        return ExitCode::from(2);
    }

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{}", e);
            exit_code(&e)
        }
    }
}

#[cfg(feature = "pcsc")]
fn hardware_transport() -> Result<Box<dyn Transport>> {
    Ok(Box::new(cardlink::reader::pcsc::PcscTransport::establish()?))
}

#[cfg(not(feature = "pcsc"))]
fn hardware_transport() -> Result<Box<dyn Transport>> {
    Err(Error::Config(
        "built without PC/SC support, use --virtual".to_string(),
    ))
}

fn open_transport(args: &Args) -> Result<Box<dyn Transport>> {
    match &args.virtual_card {
        Some(Some(path)) => Ok(Box::new(VirtualTransport::with_card(CardImage::load(path)?))),
        Some(None) => Ok(Box::new(VirtualTransport::with_card(CardImage::demo()))),
        None => hardware_transport(),
    }
}

fn run(args: &Args) -> Result<ExitCode> {
    // Malformed input is rejected before any reader is touched
    let apdus = args
        .send_apdu
        .iter()
        .map(|text| -> Result<APDU> { Ok(APDU::parse(&hex_to_bin(text)?)?) })
        .collect::<Result<Vec<APDU>>>()?;
    let root = Path::parse(&args.path)?;

    let mut config = match &args.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };
    config.debug = config.debug.max(args.debug as u32);
    if args.no_cache {
        config.use_cache = false;
    }

    let transport = open_transport(args)?;
    let transport_name = transport.name();
    let mut ctx = Context::establish(&config, transport)?;

    if args.list_readers {
        list_readers(&ctx, transport_name);
    }
    if args.list_drivers {
        list_drivers(&ctx);
    }
    if !args.card_actions() {
        return Ok(ExitCode::SUCCESS);
    }

    if args.reader >= ctx.readers().len() {
        eprintln!(
            "Illegal reader number. Only {} reader(s) configured.",
            ctx.readers().len()
        );
        return Ok(ExitCode::FAILURE);
    }
    if ctx.detect_card(args.reader)? == CardPresence::Absent {
        eprintln!("Card not present.");
        return Ok(ExitCode::from(3));
    }
    if let Some(name) = &args.card_driver {
        ctx.set_default_driver(name)?;
    }
    if !args.quiet {
        eprintln!(
            "Connecting to card in reader {}...",
            ctx.readers()[args.reader]
        );
    }
    let mut card = ctx.connect(args.reader)?;
    println!("Using card driver: {}", card.driver().name());

    let mut failed = false;
    let mut lock = card.lock()?;
    if args.atr {
        print_atr(lock.atr());
    }
    for apdu in &apdus {
        send_apdu(&mut lock, apdu)?;
    }
    if args.list_files {
        let options = EnumerateOptions {
            read_contents: args.read_contents,
        };
        let tree = enumerate(&mut lock, &root, &options);
        print_tree(&tree);
        failed = tree.has_failures();
    }
    lock.release()?;
    card.disconnect()?;
    ctx.destroy();

    Ok(if failed {
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    })
}

fn list_readers(ctx: &Context, transport: &str) {
    if ctx.readers().is_empty() {
        println!("No readers configured!");
        return;
    }
    println!("Configured readers ({}):", transport);
    for (i, name) in ctx.readers().iter().enumerate() {
        println!("  {} - {}", i, name);
    }
}

fn list_drivers(ctx: &Context) {
    if ctx.drivers().is_empty() {
        println!("No card drivers installed!");
        return;
    }
    println!("Configured card drivers:");
    for driver in ctx.drivers() {
        println!("  {:<16} {}", driver.short_name(), driver.name());
    }
}

fn print_atr(atr: &[u8]) {
    println!("ATR: {}", bin_to_hex(atr, Some(':')));
    match Atr::parse(atr) {
        Ok(parsed) => {
            let convention = if parsed.is_direct_convention() {
                "direct"
            } else {
                "inverse"
            };
            let protocols: Vec<String> = parsed.protocols.iter().map(|p| format!("T={}", p)).collect();
            println!("  convention: {}", convention);
            println!("  protocols: {}", protocols.join(", "));
            println!("  historical bytes: {}", hex_dump(&parsed.historical));
            if let Some(tck) = parsed.tck {
                let status = if parsed.tck_valid { "valid" } else { "INVALID" };
                println!("  TCK: {:02X} ({})", tck, status);
            }
        }
        Err(e) => warn!("Cannot decode ATR: {}", e),
    }
}

fn send_apdu(card: &mut Card, apdu: &APDU) -> Result<()> {
    println!("Sending: {}", hex_dump(&apdu.to_bytes()?));
    let resp = card.transmit(apdu)?;
    println!(
        "Received (SW1=0x{:02X}, SW2=0x{:02X}){}",
        resp.sw1,
        resp.sw2,
        if resp.data.is_empty() { "" } else { ":" }
    );
    if !resp.data.is_empty() {
        print!("{}", hex_dump_ascii(&resp.data, 16));
    }
    Ok(())
}

/// Printable characters as they are, everything else escaped
fn printable(data: &[u8]) -> String {
    data.iter()
        .map(|&b| {
            if (0x20..0x7F).contains(&b) {
                (b as char).to_string()
            } else {
                format!("\\x{:02X}", b)
            }
        })
        .collect()
}

fn print_tree(tree: &FileTree) {
    for entry in tree.iter() {
        print_entry(entry);
    }
}

fn print_entry(entry: &FileEntry) {
    let indent = "  ".repeat(entry.depth);
    let (file, content, listing_error) = match &entry.status {
        EntryStatus::Failed(e) => {
            eprintln!(
                "{}{:02X}{:02X}: SELECT FILE failed: {}",
                indent, entry.id[0], entry.id[1], e
            );
            return;
        }
        EntryStatus::Selected {
            file,
            content,
            listing_error,
        } => (file, content, listing_error),
    };

    let path: String = entry
        .path
        .components()
        .map(|c| format!("{:02X}{:02X} ", c[0], c[1]))
        .collect();
    match file.descriptor() {
        None => println!("{}{}type: unknown\n", indent, path),
        Some(fd) => {
            let name = fd
                .name
                .as_ref()
                .map(|n| format!("[{}] ", printable(n)))
                .unwrap_or_default();
            let structure = if fd.is_df() {
                String::new()
            } else {
                format!("ef structure: {}, ", fd.ef_structure.label())
            };
            println!(
                "{}{}{}type: {:<3}, {}size: {}",
                indent,
                path,
                name,
                fd.file_type.label(),
                structure,
                fd.size
            );

            let rules: Vec<String> = fd
                .access_rules()
                .iter()
                .map(|(op, rule)| format!("{}[{}]", op, rule))
                .collect();
            print!("{}{} ", indent, rules.join(" "));
            if !fd.sec_attr.is_empty() {
                print!("sec: {}", hex_dump(&fd.sec_attr));
            }
            if !fd.prop_attr.is_empty() {
                print!("\n{}prop: {}", indent, hex_dump(&fd.prop_attr));
            }
            println!("\n");
        }
    }

    match content {
        Some(Ok(FileContent::Binary(data))) if !data.is_empty() => {
            print!("{}", hex_dump_ascii(data, 16));
        }
        Some(Ok(FileContent::Records(records))) => {
            for (i, record) in records.iter().enumerate() {
                println!("{}record {}:", indent, i + 1);
                print!("{}", hex_dump_ascii(record, 16));
            }
        }
        Some(Err(e)) => eprintln!("{}Reading {} failed: {}", indent, entry.path, e),
        _ => {}
    }
    if let Some(e) = listing_error {
        eprintln!("{}Listing files failed: {}", indent, e);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_no_flags_is_no_action() {
        let args = Args::try_parse_from(["cardlink-tool", "-d", "--no-cache"]).unwrap();
        assert!(!args.any_action());
        assert!(Args::command().render_help().to_string().contains("--send-apdu"));

        let args = Args::try_parse_from(["cardlink-tool", "--virtual", "-l"]).unwrap();
        assert!(args.any_action());
        assert!(!args.card_actions());
        assert_eq!(args.virtual_card, Some(None));
    }
}
