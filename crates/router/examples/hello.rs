use futures::FutureExt;
use http::Method;
use plug_core::transport::{inbound_channel, outbound_channel};
use plug_core::{plug_fn, Adapter, Conn, Pipeline, Scope};
use plug_router::{Router, ROUTER_ARGS_KEY};

fn hello() -> impl plug_core::Plug {
    plug_fn(|conn: &mut Conn| {
        async move {
            let name = conn
                .get_private(ROUTER_ARGS_KEY)
                .and_then(|args| args.get("name"))
                .and_then(|value| value.as_str())
                .unwrap_or("world")
                .to_owned();
            conn.send_resp(format!("hello, {name}!\n"), None, true).await
        }
        .boxed()
    })
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt().with_max_level(tracing::Level::DEBUG).init();

    let router = Router::new().route("/hello/<name>", &[Method::GET], hello()).unwrap();
    let app = Adapter::new(Pipeline::new().plug(router));

    let (_tx_in, receiver) = inbound_channel();
    let (transmitter, mut rx_out) = outbound_channel();
    let scope = Scope::http(Method::GET, "/hello/rustacean");
    app.handle(scope, Box::new(receiver), Box::new(transmitter)).await.unwrap();

    while let Ok(message) = rx_out.try_recv() {
        println!("{message:?}");
    }
}
