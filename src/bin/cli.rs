// Dramabox Core - REST facade over the Dramabox mobile API
// Copyright (C) 2025 Henning Berge
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU General Public License for more details.
//
// You should have received a copy of the GNU General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.


use anyhow::Context;
use clap::{Parser, Subcommand};
use dramabox_core::{server, ClientConfig, DramaboxClient};
use serde::Serialize;
use std::net::SocketAddr;
use std::sync::Arc;
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser)]
#[command(name = "dramabox-cli")]
#[command(about = "Dramabox CLI - REST facade and one-shot API calls", long_about = None)]
struct Cli {
    /// Language partition (defaults to DRAMABOX_LANGUAGE or "in")
    #[arg(short, long, global = true)]
    lang: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the HTTP facade
    Serve {
        /// Address to bind
        #[arg(short, long, default_value = "0.0.0.0:3000", env = "DRAMABOX_LISTEN")]
        addr: SocketAddr,
    },
    /// Search dramas by keyword
    Search {
        keyword: String,
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(short, long, default_value_t = 20)]
        size: u32,
    },
    /// List the home theater
    Home {
        #[arg(short, long, default_value_t = 1)]
        page: u32,
        #[arg(short, long, default_value_t = 20)]
        size: u32,
    },
    /// Show drama details
    Detail {
        book_id: String,
    },
    /// List chapters of a drama
    Chapters {
        book_id: String,
        /// Walk every batch window instead of the first one
        #[arg(short, long)]
        all: bool,
    },
    /// Resolve playable URLs for an episode
    Stream {
        book_id: String,
        /// 1-based episode number
        episode: u32,
    },
    /// List categories
    Categories,
    /// List recommended dramas
    Recommend,
    /// Print the headers a signed request would carry
    Headers,
}

fn print_json<T: Serialize + ?Sized>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // .env is optional
    let _ = dotenvy::dotenv();

    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info,dramabox_core=debug")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();

    let config = ClientConfig::from_env().context("loading configuration")?;
    let lang = cli.lang.unwrap_or_else(|| config.default_language.clone());
    let client = DramaboxClient::new(config).context("building client")?;

    match cli.command {
        Commands::Serve { addr } => {
            server::serve(addr, Arc::new(client)).await?;
        }
        Commands::Search { keyword, page, size } => {
            print_json(&*client.search(&keyword, page, size, &lang).await?)?;
        }
        Commands::Home { page, size } => {
            print_json(&*client.list_home(page, size, &lang).await?)?;
        }
        Commands::Detail { book_id } => {
            print_json(&*client.get_detail(&book_id, &lang).await?)?;
        }
        Commands::Chapters { book_id, all } => {
            if all {
                let listing = client.batch_list_all_chapters(&book_id, &lang).await;
                for problem in &listing.suppressed {
                    eprintln!("warning: {}", problem);
                }
                print_json(&listing.value)?;
                eprintln!(
                    "{} chapters, {} suppressed error(s)",
                    listing.value.len(),
                    listing.suppressed.len()
                );
            } else {
                print_json(&*client.list_chapters(&book_id, &lang).await?)?;
            }
        }
        Commands::Stream { book_id, episode } => {
            print_json(&*client.get_stream_url(&book_id, episode, &lang).await?)?;
        }
        Commands::Categories => {
            print_json(&*client.list_categories(&lang).await?)?;
        }
        Commands::Recommend => {
            print_json(&*client.list_recommended(&lang).await?)?;
        }
        Commands::Headers => {
            print_json(&client.get_debug_headers(&lang).await?)?;
        }
    }

    Ok(())
}
