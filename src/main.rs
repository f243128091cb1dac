#![deny(
    nonstandard_style,
    rust_2018_idioms,
    trivial_casts,
    trivial_numeric_casts,
    unsafe_code
)]

#[tokio::main]
async fn main() {
    if let Err(failure) = meetbot_worker::run().await {
        std::process::exit(failure.code);
    }
}
