//! Binary entrypoint for subfont (made by FontLab https://www.fontlab.com/)

fn main() {
    if let Err(err) = subfont_cli::run() {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
