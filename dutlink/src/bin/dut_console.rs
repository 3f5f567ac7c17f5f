//! Minimal bench console: bring up a connector and mirror its byte stream.
//!
//! ```sh
//! dut_console --port /dev/ttyACM0 --baudrate 115200 --send help
//! dut_console --resource process --image ./device_sim
//! ```

use std::io::Write as _;
use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use dutlink::{ConnectorConfig, build_connector};

#[derive(Parser)]
#[command(about = "Open a device connector and echo its output")]
struct Args {
    /// Backend to use: serial or process
    #[arg(long, default_value = "serial")]
    resource: String,
    /// Serial port to open (serial backend)
    #[arg(long)]
    port: Option<String>,
    /// Executable standing in for the device (process backend)
    #[arg(long)]
    image: Option<PathBuf>,
    #[arg(long, default_value_t = 9600)]
    baudrate: u32,
    /// Line to send before listening
    #[arg(long)]
    send: Option<String>,
    /// How long to listen before closing, in seconds
    #[arg(long, default_value_t = 10)]
    listen: u64,
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    let config = ConnectorConfig {
        image_path: args.image,
        baudrate: args.baudrate,
        ..Default::default()
    };
    let Some(mut conn) =
        build_connector(&args.resource, "console", args.port.as_deref(), &config).await
    else {
        eprintln!(
            "cannot build a '{}' connector (missing --port?)",
            args.resource
        );
        std::process::exit(2);
    };
    if let Some(err) = conn.error() {
        eprintln!("failed to open connector: {err}");
        std::process::exit(1);
    }

    if let Some(line) = &args.send {
        conn.write(line.as_bytes(), true).await;
        conn.write(b"\n", false).await;
        conn.flush().await;
    }

    let deadline = tokio::time::Instant::now() + Duration::from_secs(args.listen);
    while tokio::time::Instant::now() < deadline && conn.connected() {
        let data = conn.read(256).await;
        if !data.is_empty() {
            print!("{}", String::from_utf8_lossy(&data));
            let _ = std::io::stdout().flush();
        }
    }
    if let Some(err) = conn.error() {
        eprintln!("link degraded: {err}");
    }
    conn.finish().await;
}
