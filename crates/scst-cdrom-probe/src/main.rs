use anyhow::Result;
use clap::Parser;
use env_logger::Env;

mod commands;

#[derive(Parser, Debug)]
#[clap(version, about, long_about = None)]
struct Opts {
    /// Verbose
    #[clap(short, long)]
    verbose: bool,

    /// List the connected USB mass-storage devices and exit
    #[clap(short, long)]
    list: bool,

    /// Device to attach to as VID:PID in hex, e.g. 0e8d:1806. Defaults to the first mass-storage device.
    #[clap(short, long, value_parser = usb_id_parser)]
    device: Option<(u16, u16)>,

    /// Logical unit to attach
    #[clap(long, default_value = "0", value_parser = num_parser)]
    lun: u8,

    /// Command written to the handler's trace_level entry before attaching, e.g. "add scsi"
    #[clap(short, long)]
    trace_level: Option<String>,
}

// allow user to pass hex formatted numbers
fn num_parser(s: &str) -> Result<u8, &'static str> {
    match s.get(0..2) {
        Some("0x") => u8::from_str_radix(&s[2..], 16).map_err(|_| "invalid hex number"),
        Some("0b") => u8::from_str_radix(&s[2..], 2).map_err(|_| "invalid binary number"),
        _ => s.parse::<u8>().map_err(|_| "invalid decimal number"),
    }
}

fn usb_id_parser(s: &str) -> Result<(u16, u16), &'static str> {
    let (vendor, product) = s.split_once(':').ok_or("expected VID:PID")?;
    let vendor = u16::from_str_radix(vendor, 16).map_err(|_| "invalid vendor id")?;
    let product = u16::from_str_radix(product, 16).map_err(|_| "invalid product id")?;
    Ok((vendor, product))
}

fn main() -> Result<()> {
    let opts = Opts::parse();

    if opts.verbose {
        env_logger::Builder::from_env(Env::default().default_filter_or("debug")).init();
    } else {
        env_logger::Builder::from_env(Env::default().default_filter_or("info")).init();
    }

    if opts.list {
        return commands::list::list();
    }

    commands::probe::probe(opts.device, opts.lun, opts.trace_level)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_usb_ids() {
        assert_eq!(usb_id_parser("0e8d:1806"), Ok((0x0e8d, 0x1806)));
        assert!(usb_id_parser("0e8d").is_err());
        assert!(usb_id_parser("zzzz:1806").is_err());
    }

    #[test]
    fn parses_luns() {
        assert_eq!(num_parser("0x03"), Ok(3));
        assert_eq!(num_parser("0b11"), Ok(3));
        assert_eq!(num_parser("7"), Ok(7));
        assert!(num_parser("256").is_err());
    }

    #[test]
    fn cli_definition() {
        use clap::CommandFactory;
        Opts::command().debug_assert();
    }
}
