use trema::{Result, cli, logger};

fn main() -> Result<()> {
    logger::init();
    cli::run()
}
