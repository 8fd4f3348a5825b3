use std::process::exit;

fn main() {
    // env_logger writes to stderr, not stdout, so it never corrupts the
    // UCI protocol stream.
    env_logger::init();
    exit(match corvid::uci::try_run() {
        Ok(_) => 0,
        Err(_) => 1,
    })
}
