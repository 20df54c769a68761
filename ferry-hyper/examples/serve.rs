use std::net::SocketAddr;

use ferry::http::{header, HeaderValue};
use ferry::{BoxError, Config, Context, Request, Respond, Response, Shim};
use ferry_hyper::{RemoteAddr, Serve};
use tracing_subscriber::EnvFilter;

async fn index(req: Request, cx: Context) -> Result<Response, BoxError> {
    if req.uri().path() == "/boom" {
        return Err("boom".into());
    }

    let remote = req.extensions().get::<RemoteAddr>().map(|addr| addr.0);
    cx.wait_until(async move {
        tracing::info!(?remote, "recording page view");
        Ok::<(), BoxError>(())
    });

    let mut response = format!(
        "<h1>Brainiac Coder</h1><p>{} {}</p>",
        req.method(),
        cx.function_path()
    )
    .respond();
    response
        .headers_mut()
        .insert(header::CONTENT_TYPE, HeaderValue::from_static("text/html"));
    Ok(response)
}

#[tokio::main]
async fn main() -> Result<(), BoxError> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    let shim = Shim::load(|| Ok::<_, BoxError>(index))?.with_config(Config::new());
    shim.serve(SocketAddr::from(([127, 0, 0, 1], 3000)))?.await?;
    Ok(())
}
