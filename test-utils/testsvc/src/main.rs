use clap::Parser;
use http_body_util::Full;
use hyper::body::Bytes;
use hyper::server::conn::http1;
use hyper::service::service_fn;
use hyper::{Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use std::net::{IpAddr, SocketAddr};
use std::time::{Duration, Instant};
use tokio::net::TcpListener;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

/// Managed service stand-in for Fleet Supervisor E2E testing
#[derive(Parser, Debug)]
#[command(name = "testsvc")]
#[command(about = "Test service for supervisor testing", long_about = None)]
struct Args {
    /// Port to serve GET /health on
    #[arg(long)]
    port: u16,

    /// Address to bind
    #[arg(long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Seconds after startup to start answering /health with 503
    #[arg(long)]
    fail_health_after: Option<u64>,

    /// Seconds after startup to exit with `exit_code`
    #[arg(long)]
    crash_after: Option<u64>,

    /// Exit code used by --crash-after
    #[arg(long, default_value = "1")]
    exit_code: i32,

    /// Duration in seconds to run before exiting cleanly (0 = run indefinitely)
    #[arg(long, default_value = "0")]
    run_duration: u64,

    /// Milliseconds to wait after SIGTERM before exiting
    #[arg(long, default_value = "0")]
    shutdown_delay_ms: u64,
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_target(false)
        .with_thread_ids(false)
        .init();

    let args = Args::parse();
    info!("Starting testsvc with args: {:?}", args);

    let addr = SocketAddr::new(args.bind, args.port);
    let listener = match TcpListener::bind(addr).await {
        Ok(l) => l,
        Err(e) => {
            error!("Failed to bind {}: {}", addr, e);
            std::process::exit(2);
        }
    };
    info!("Listening on http://{}", addr);

    let started = Instant::now();
    tokio::spawn(serve_health(listener, started, args.fail_health_after));

    let crash = async {
        match args.crash_after {
            Some(secs) => sleep(Duration::from_secs(secs)).await,
            None => std::future::pending().await,
        }
    };
    let finish = async {
        match args.run_duration {
            0 => std::future::pending().await,
            secs => sleep(Duration::from_secs(secs)).await,
        }
    };

    tokio::select! {
        _ = crash => {
            error!("Crashing after {:?} as requested", args.crash_after);
            std::process::exit(args.exit_code);
        }
        _ = finish => info!("Run duration ({} seconds) reached, exiting", args.run_duration),
        _ = termination() => {
            info!("Received termination signal");
            if args.shutdown_delay_ms > 0 {
                info!("Shutdown delay: waiting {}ms", args.shutdown_delay_ms);
                sleep(Duration::from_millis(args.shutdown_delay_ms)).await;
            }
        }
    }

    info!("testsvc stopped");
}

async fn termination() {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate()).expect("Failed to setup SIGTERM handler");
    let mut sigint = signal(SignalKind::interrupt()).expect("Failed to setup SIGINT handler");
    tokio::select! {
        _ = sigterm.recv() => {}
        _ = sigint.recv() => {}
    }
}

async fn serve_health(listener: TcpListener, started: Instant, fail_after: Option<u64>) {
    loop {
        let (stream, _) = match listener.accept().await {
            Ok(conn) => conn,
            Err(e) => {
                warn!("Failed to accept connection: {}", e);
                continue;
            }
        };

        tokio::spawn(async move {
            let service = service_fn(move |req: Request<hyper::body::Incoming>| async move {
                let failing = fail_after.is_some_and(|secs| started.elapsed().as_secs() >= secs);
                let (status, body) = match req.uri().path() {
                    "/health" if failing => (StatusCode::SERVICE_UNAVAILABLE, "Unhealthy\n"),
                    "/health" => (StatusCode::OK, "OK\n"),
                    _ => (StatusCode::NOT_FOUND, "Not Found\n"),
                };
                debug!("{} {} -> {}", req.method(), req.uri().path(), status);

                let mut response = Response::new(Full::new(Bytes::from(body)));
                *response.status_mut() = status;
                Ok::<_, hyper::Error>(response)
            });

            if let Err(e) = http1::Builder::new()
                .serve_connection(TokioIo::new(stream), service)
                .await
            {
                debug!("Connection error: {}", e);
            }
        });
    }
}
