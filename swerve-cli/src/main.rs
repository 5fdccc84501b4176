use std::{num::NonZeroU16, path::PathBuf};

use anyhow::{Context, Result, bail};
use clap::{Parser, Subcommand};
use swerve_certs::{CertificateIssuer, Validity};
use swerve_portmapper::{MappingRequest, PortMapper};
use tracing::{debug, info};
use tracing_subscriber::{EnvFilter, prelude::*};

use crate::config::CliConfig;

mod config;

#[derive(Parser, Debug)]
#[command(version, about)]
struct Cli {
    /// Path to config file
    #[clap(short, long)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Map a local port on the gateway and hold the mapping until Ctrl-C.
    Map {
        /// Local port to expose.
        port: NonZeroU16,
        /// Public port to ask for. The gateway may grant another one.
        #[clap(long)]
        public_port: Option<NonZeroU16>,
        /// Map UDP as well.
        #[clap(long)]
        udp: bool,
        /// Do not map TCP.
        #[clap(long)]
        no_tcp: bool,
    },
    /// Print the public and local addresses.
    Addresses,
    /// Issue a self-signed certificate and write it as a PKCS#12 archive.
    Cert {
        /// Where to write the archive.
        out: PathBuf,
        /// Password protecting the archive.
        #[clap(long)]
        password: String,
        /// Subject common name. Overrides the config file.
        #[clap(long)]
        label: Option<String>,
        /// Days of validity. Overrides the config file.
        #[clap(long)]
        days: Option<u32>,
        /// Key size in bits. Overrides the config file.
        #[clap(long)]
        bits: Option<u32>,
        /// Also write the certificate and key as PEM next to the archive.
        #[clap(long)]
        pem: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::from_default_env())
        .init();
    let args = Cli::parse();

    let config = if let Some(path) = args.config {
        debug!("loading config from {:?}", path);
        CliConfig::load(path).await?
    } else {
        debug!("using default config");
        CliConfig::default()
    };

    match args.command {
        Commands::Map {
            port,
            public_port,
            udp,
            no_tcp,
        } => {
            let request = MappingRequest::new(port)
                .with_desired_public_port(public_port)
                .map_tcp(!no_tcp)
                .map_udp(udp);
            map_until_ctrl_c(request, config).await
        }
        Commands::Addresses => addresses(config).await,
        Commands::Cert {
            out,
            password,
            label,
            days,
            bits,
            pem,
        } => {
            let mut request = config.certificate.request();
            if let Some(label) = label {
                request.label = label;
            }
            if let Some(days) = days {
                request.validity = Validity::Days(days);
            }
            if let Some(bits) = bits {
                request.key_bits = bits;
            }
            issue_certificate(CertificateIssuer::new(request), out, &password, pem).await
        }
    }
}

async fn map_until_ctrl_c(request: MappingRequest, config: CliConfig) -> Result<()> {
    let mapper = PortMapper::new(request, config.portmapper)?.with_handler(|state| {
        debug!("mapping settled: {}", state.phase());
    });
    if !mapper.opened().await {
        let state = mapper.state();
        match state.error() {
            Some(e) => bail!("failed to map port (code {}): {e}", state.last_error()),
            None => bail!("failed to map port"),
        }
    }

    let state = mapper.state();
    if let Some(addr) = state.external_addr() {
        println!("{} -> {addr}", request.private_port());
    }
    if let Some(udp_port) = state.udp_port() {
        println!("udp mapped to port {udp_port}");
    }

    info!("holding mapping, press Ctrl-C to stop");
    tokio::signal::ctrl_c().await?;
    mapper.close();
    Ok(())
}

async fn addresses(config: CliConfig) -> Result<()> {
    match PortMapper::external_address(&config.portmapper).await {
        Some(ip) => println!("public: {ip}"),
        None => println!("public: unknown"),
    }
    match PortMapper::local_address() {
        Some(ip) => println!(
            "local:  {ip} ({})",
            if PortMapper::local_address_is_private() {
                "private"
            } else {
                "public"
            }
        ),
        None => println!("local:  unknown"),
    }
    Ok(())
}

async fn issue_certificate(
    mut issuer: CertificateIssuer,
    out: PathBuf,
    password: &str,
    pem: bool,
) -> Result<()> {
    // rsa key generation takes a while
    let issuer = tokio::task::spawn_blocking(move || {
        issuer.try_create_self_signed()?;
        anyhow::Ok(issuer)
    })
    .await??;
    let archive = issuer.create_pkcs12(password)?;
    tokio::fs::write(&out, archive)
        .await
        .with_context(|| format!("failed to write {}", out.display()))?;
    println!("wrote {}", out.display());

    if pem {
        let certificate = issuer
            .certificate()
            .context("certificate missing after issuance")?;
        let cert_path = out.with_extension("crt");
        let key_path = out.with_extension("key");
        tokio::fs::write(&cert_path, certificate.pem()).await?;
        tokio::fs::write(&key_path, certificate.key_pem()).await?;
        println!("wrote {} and {}", cert_path.display(), key_path.display());
    }
    Ok(())
}
