// ===============================
// src/metrics.rs
// ===============================
use once_cell::sync::Lazy;
use prometheus::{
    Encoder, GaugeVec, IntCounter, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use std::io::{Read, Write};
use std::net::{TcpListener, TcpStream};
use std::thread;
use tracing::{debug, error, info};

// Single custom registry (everything is registered here)
pub static REGISTRY: Lazy<Registry> = Lazy::new(Registry::new);

// -------- Engine --------
pub static TIMESTEPS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("timesteps_total", "trader invocations").unwrap());

pub static ORDERS_BY_SYMBOL: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("orders_total", "orders emitted per symbol"), &["symbol"]).unwrap()
});

pub static RISK_DROPS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(
        Opts::new("risk_drops_total", "order sets dropped by the final limit check"),
        &["symbol"],
    )
    .unwrap()
});

pub static CONVERSIONS: Lazy<IntCounter> =
    Lazy::new(|| IntCounter::new("conversions_total", "conversion requests issued").unwrap());

pub static MEMORY_RESETS: Lazy<IntCounter> = Lazy::new(|| {
    IntCounter::new("memory_resets_total", "unreadable memory blobs replaced by empty memory").unwrap()
});

pub static ARB_DIVERGENCE: Lazy<GaugeVec> = Lazy::new(|| {
    GaugeVec::new(
        Opts::new("arb_divergence", "z(composite) - z(synthetic), last timestep"),
        &["symbol"],
    )
    .unwrap()
});

// -------- Paper exchange --------
pub static FILLS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("fills_total", "paper fills per symbol and side"), &["symbol", "side"]).unwrap()
});

pub static REJECTS: Lazy<IntCounterVec> = Lazy::new(|| {
    IntCounterVec::new(Opts::new("venue_rejects_total", "order sets rejected by the paper venue"), &["symbol"])
        .unwrap()
});

pub static POSITION: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("position", "net position per symbol"), &["symbol"]).unwrap()
});

pub static PNL_REALIZED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("pnl_realized", "realized PnL (price units, truncated)").unwrap());

pub static PNL_UNREALIZED: Lazy<IntGauge> =
    Lazy::new(|| IntGauge::new("pnl_unrealized", "unrealized PnL (price units, truncated)").unwrap());

// -------- Config visibility --------
pub static CONFIG_FEED_MODE: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_feed_mode", "feed mode (label: mode)"), &["mode"]).unwrap()
});

pub static CONFIG_LIMIT: Lazy<IntGaugeVec> = Lazy::new(|| {
    IntGaugeVec::new(Opts::new("config_position_limit", "position limit (label: symbol)"), &["symbol"]).unwrap()
});

pub fn init() {
    for r in [
        REGISTRY.register(Box::new(TIMESTEPS.clone())),
        REGISTRY.register(Box::new(ORDERS_BY_SYMBOL.clone())),
        REGISTRY.register(Box::new(RISK_DROPS.clone())),
        REGISTRY.register(Box::new(CONVERSIONS.clone())),
        REGISTRY.register(Box::new(MEMORY_RESETS.clone())),
        REGISTRY.register(Box::new(ARB_DIVERGENCE.clone())),
        REGISTRY.register(Box::new(FILLS.clone())),
        REGISTRY.register(Box::new(REJECTS.clone())),
        REGISTRY.register(Box::new(POSITION.clone())),
        REGISTRY.register(Box::new(PNL_REALIZED.clone())),
        REGISTRY.register(Box::new(PNL_UNREALIZED.clone())),
        REGISTRY.register(Box::new(CONFIG_FEED_MODE.clone())),
        REGISTRY.register(Box::new(CONFIG_LIMIT.clone())),
    ] {
        // double registration only happens in tests
        let _ = r;
    }
}

// Prometheus text format
pub fn encode_metrics() -> Vec<u8> {
    let encoder = TextEncoder::new();
    let families = REGISTRY.gather();
    let mut buf = Vec::new();
    if encoder.encode(&families, &mut buf).is_err() || buf.is_empty() {
        buf.extend_from_slice(b"# no metrics\n");
    }
    buf
}

fn respond(stream: &mut TcpStream, status: &str, body: &[u8]) -> std::io::Result<()> {
    write!(
        stream,
        "HTTP/1.1 {status}\r\nContent-Type: text/plain; version=0.0.4; charset=utf-8\r\nContent-Length: {}\r\nConnection: close\r\n\r\n",
        body.len()
    )?;
    stream.write_all(body)?;
    stream.flush()
}

/// `GET /metrics` (or `/`) gets the registry, anything else a 404.
fn handle_client(mut stream: TcpStream) {
    let mut req = [0u8; 1024];
    let n = stream.read(&mut req).unwrap_or(0);
    let path = std::str::from_utf8(&req[..n])
        .ok()
        .and_then(|r| r.split_whitespace().nth(1))
        .unwrap_or("/");
    let res = match path {
        "/" | "/metrics" => respond(&mut stream, "200 OK", &encode_metrics()),
        _ => respond(&mut stream, "404 Not Found", b"not found\n"),
    };
    if let Err(e) = res {
        debug!(?e, "metrics client went away");
    }
}

/// Blocking accept loop on its own OS thread, off the tokio runtime.
pub fn serve_metrics(port: u16) {
    thread::spawn(move || {
        let addr = format!("0.0.0.0:{port}");
        let listener = match TcpListener::bind(&addr) {
            Ok(l) => l,
            Err(e) => {
                error!(?e, %addr, "metrics bind failed, endpoint disabled");
                return;
            }
        };
        info!(%addr, "metrics listening");
        for conn in listener.incoming() {
            match conn {
                Ok(stream) => handle_client(stream),
                Err(e) => error!(?e, "metrics accept error"),
            }
        }
    });
}
