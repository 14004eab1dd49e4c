use std::net::{AddrParseError, IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

use clap::Parser;

/// Every option can also come from the environment, or from a `.env` file.
#[derive(Parser, Debug)]
#[command(about = "Collect feedback and review it behind a login")]
pub struct Args {
    /// Whether clients connect over https.
    /// If so, the session cookie is sent as a secure cookie.
    #[arg(short, long, env = "SECURE")]
    secure: bool,

    /// The address to listen on. By default
    /// only the IPv4 loopback.
    #[arg(short, long, env = "ADDRESS")]
    address: Option<String>,

    /// The port to listen on.
    #[arg(short, long, env = "PORT", default_value_t = 3000)]
    port: u16,

    /// Where users, feedback and sessions are stored.
    #[arg(short, long, env = "DATA_DIR", default_value = "data")]
    data_dir: PathBuf,

    /// Directory of static assets, served from the site root.
    #[arg(long, env = "STATIC_DIR", default_value = "public")]
    static_dir: PathBuf,
}

impl Args {
    pub fn addr(&self) -> Result<SocketAddr, AddrParseError> {
        self.address
            .as_deref()
            .unwrap_or("127.0.0.1")
            .parse()
            .map(|addr: IpAddr| (addr, self.port).into())
    }

    pub fn secure(&self) -> bool {
        self.secure
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    pub fn static_dir(&self) -> &Path {
        &self.static_dir
    }
}
