mod actions;
mod cli;
mod config;
mod filter;
mod flow;
mod gestures;
mod hand;
mod input;
mod ipc;
mod logging;
mod motion;
mod tracker;
mod window;

fn main() -> anyhow::Result<()> {
    logging::init();
    cli::run()
}
