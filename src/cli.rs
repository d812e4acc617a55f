#[derive(clap::Parser)]
#[command(
    name = "crap-clone",
    about = "Convert a remote CVS repository into a git fast-import stream",
    disable_version_flag = true
)]
pub(crate) struct Cli {
    #[arg(
        short = 'z',
        long = "compress",
        value_name = "LEVEL",
        default_value_t = 0,
        value_parser = clap::value_parser!(u32).range(0..=9),
        help = "Transport compression level (0 disables compression)"
    )]
    pub(crate) compress: u32,
    #[arg(
        value_name = "ROOT",
        help = "CVS root, e.g. :pserver:user@host/var/cvs or /var/cvs"
    )]
    pub(crate) root: String,
    #[arg(value_name = "MODULE", help = "Module to convert")]
    pub(crate) module: String,
}
