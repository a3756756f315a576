use futures::{SinkExt, StreamExt};
use pyresource::core::resources::Truthiness;
use pyresource::remote::protocol::{self, Reply, ReplyEnvelope, WireError};
use pyresource::{
    Distribution, Kind, Manager, Options, Path, ResourceError, ResourceManager, RpcClient,
    RpcServer,
};
use serde::Serialize;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio_util::codec::Framed;
use tokio_util::sync::CancellationToken;

const TOPLEVEL_DATA: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/data/toplevel.json");

async fn bundled_core() -> Arc<ResourceManager> {
    let mut opts = Options::load_default().await.unwrap();
    opts.toplevel_data_path = Some(TOPLEVEL_DATA.to_string());
    let (core, ready) = ResourceManager::new(opts);
    ready.wait().await.unwrap();
    Arc::new(core)
}

async fn serve(core: Arc<ResourceManager>) -> (String, CancellationToken) {
    let server = RpcServer::bind("127.0.0.1:0", core).await.unwrap();
    let addr = server.local_addr().unwrap().to_string();
    let token = server.shutdown_token();
    tokio::spawn(server.serve());
    (addr, token)
}

async fn serve_bundled_data() -> (RpcClient, Arc<ResourceManager>, CancellationToken) {
    let core = bundled_core().await;
    let (addr, token) = serve(core.clone()).await;
    let client = RpcClient::connect(&addr).await.unwrap();
    (client, core, token)
}

#[tokio::test]
async fn remote_queries_match_local_ones() {
    let (client, core, token) = serve_bundled_data().await;

    let dumps = client.resolve_symbol(&Path::new("json.dumps")).await.unwrap();
    assert_eq!(dumps.path_string(), "json.dumps");
    assert_eq!(dumps, core.resolve_symbol(&Path::new("json.dumps")).await.unwrap());

    let docs = client.documentation(&dumps).await.unwrap().unwrap();
    assert!(!docs.text.is_empty());

    let returns = client.return_types(&dumps).await.unwrap();
    assert!(returns.iter().any(|r| r.path_string().contains("str")));

    let truthy = client.truthy_return_types(&dumps).await.unwrap();
    assert_eq!(truthy[0].truthiness, Truthiness::Stub);

    assert_eq!(client.kind(&dumps).await.unwrap(), Kind::Function);
    assert_eq!(
        client.num_args_frequency(&dumps, 1).await.unwrap(),
        Some(0.45)
    );
    assert_eq!(
        client.keyword_arg_frequency(&dumps, "indent").await.unwrap(),
        Some(410)
    );
    let sigs = client.signatures(&dumps).await.unwrap().unwrap();
    assert_eq!(sigs.len(), 3);
    let spec = client.arg_spec(&dumps).await.unwrap().unwrap();
    assert_eq!(spec.kwarg.as_deref(), Some("kw"));
    assert_eq!(client.error_count(), 0);

    token.cancel();
}

#[tokio::test]
async fn cross_distribution_symbols_keep_both_identities() {
    let (client, _core, token) = serve_bundled_data().await;

    let sym = client
        .resolve_symbol(&Path::new("requests.compat.json.dumps"))
        .await
        .unwrap();
    assert!(!sym.is_canonical());
    assert_eq!(sym.queried_key().dist, Distribution::new("requests", "2.22.0"));
    assert_eq!(sym.canonical_key().dist, Distribution::builtin("3.7"));
    assert_eq!(sym.path_string(), "json.dumps");

    let response = client
        .resolve_symbol(&Path::new("requests.models.Response"))
        .await
        .unwrap();
    let bases = client.bases(&response).await.unwrap();
    assert_eq!(bases[0].path_string(), "builtins.object");

    let text = client.child_symbol(&response, "text").await.unwrap();
    let ty = client.symbol_type(&text).await.unwrap();
    assert_eq!(ty.path_string(), "builtins.str");

    token.cancel();
}

#[tokio::test]
async fn no_value_is_not_an_error() {
    let (client, _core, token) = serve_bundled_data().await;

    let object = client
        .resolve_symbol(&Path::new("builtins.object"))
        .await
        .unwrap();
    assert!(client.arg_spec(&object).await.unwrap().is_none());
    assert!(client.sig_stats(&object).await.unwrap().is_none());
    assert!(client.kwargs(&object).await.unwrap().is_none());

    // requests ships no sig stats at all
    let get = client
        .resolve_symbol(&Path::new("requests.get"))
        .await
        .unwrap();
    assert!(client.num_args_frequency(&get, 1).await.unwrap().is_none());
    assert_eq!(client.error_count(), 0);

    // top-level data fills in missing docs
    let requests = client.resolve_symbol(&Path::new("requests")).await.unwrap();
    let docs = client.documentation(&requests).await.unwrap().unwrap();
    assert!(docs.text.starts_with("Requests HTTP Library"));
    assert_eq!(client.kind(&requests).await.unwrap(), Kind::Module);

    token.cancel();
}

#[tokio::test]
async fn errors_keep_their_identity() {
    let (client, _core, token) = serve_bundled_data().await;

    let err = client
        .resolve_symbol(&Path::new("numpy.array"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResourceError::NoDistributionsMatch(_)));

    let err = client
        .resolve_symbol(&Path::new("json.nothing"))
        .await
        .unwrap_err();
    assert!(matches!(err, ResourceError::PathNotFound { .. }));
    assert!(matches!(err.root_cause(), ResourceError::AttributeNotFound(_)));

    let json = client.resolve_symbol(&Path::new("json")).await.unwrap();
    let err = client.symbol_type(&json).await.unwrap_err();
    assert!(matches!(err, ResourceError::NoType(_)));

    assert_eq!(client.error_count(), 3);
    token.cancel();
}

#[tokio::test]
async fn concurrent_calls_share_a_connection() {
    let (client, _core, token) = serve_bundled_data().await;
    let client = Arc::new(client);

    let paths = ["json.dumps", "json.loads", "builtins.str", "requests.get"];
    let calls: Vec<_> = paths
        .iter()
        .map(|path| {
            let client = client.clone();
            let path = path.to_string();
            tokio::spawn(async move { client.resolve_symbol(&Path::new(&path)).await })
        })
        .collect();

    let mut resolved = Vec::new();
    for call in futures::future::join_all(calls).await {
        resolved.push(call.unwrap().unwrap().path_string());
    }
    assert_eq!(
        resolved,
        vec!["json.dumps", "json.loads", "builtins.str", "requests.api.get"]
    );

    token.cancel();
}

#[tokio::test]
async fn closing_the_client_leaves_the_server_manager_open() {
    let (client, core, token) = serve_bundled_data().await;

    client.resolve_symbol(&Path::new("json.dumps")).await.unwrap();
    client.close().await.unwrap();

    assert!(core.distribution_loaded(&Distribution::builtin("3.7")).await.unwrap());
    assert!(core.resolve_symbol(&Path::new("json.dumps")).await.is_ok());

    let err = client.packages().await.unwrap_err();
    assert!(matches!(err, ResourceError::Rpc(_)));

    token.cancel();
}

#[tokio::test]
async fn nil_distribution_errors_match_local_ones() {
    let (client, core, token) = serve_bundled_data().await;
    let client = client.with_timeout(Some(Duration::from_secs(5)));

    let local = core.top_levels(&Distribution::default()).await.unwrap_err();
    let start = Instant::now();
    let remote = client.top_levels(&Distribution::default()).await.unwrap_err();
    assert!(start.elapsed() < Duration::from_secs(5));

    assert!(matches!(local, ResourceError::DistributionUnloadable { .. }));
    assert!(
        matches!(&remote, ResourceError::DistributionUnloadable { dist, .. } if dist.is_nil()),
        "unexpected remote error: {remote}"
    );
    assert_eq!(client.error_count(), 1);

    token.cancel();
}

#[derive(Serialize)]
struct UnknownCall {
    id: u64,
    call: &'static str,
}

#[tokio::test]
async fn undecodable_requests_get_an_error_reply() {
    let (addr, token) = serve(bundled_core().await).await;

    let stream = TcpStream::connect(&addr).await.unwrap();
    let mut framed = Framed::new(stream, protocol::codec());
    let frame = protocol::encode(&UnknownCall {
        id: 7,
        call: "Frobnicate",
    })
    .unwrap();
    framed.send(frame).await.unwrap();

    let reply = tokio::time::timeout(Duration::from_secs(5), framed.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let ReplyEnvelope { id, reply } = protocol::decode(&reply).unwrap();
    assert_eq!(id, 7);
    assert!(matches!(reply, Reply::Error(WireError::Serialization(_))));

    token.cancel();
}
