//! Integration tests for calls between two endpoints.

use astview_core::remoting::Endpoint;
use astview_core::services::{
    BackendDispatcher, BackendProxy, FrontendDispatcher, FrontendProxy, SyntaxTreeViewBackend,
    SyntaxTreeViewFrontend,
};
use astview_core::{RemotingError, Result, SyntaxTreeNode};
use async_trait::async_trait;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::{mpsc, Notify};

/// Two endpoints connected over loopback TCP.
async fn tcp_pair() -> (Endpoint, Endpoint) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
    (Endpoint::open(client.unwrap()), Endpoint::open(server.unwrap().0))
}

#[derive(Debug, PartialEq)]
enum FrontendCall {
    Cursor(usize),
    SubTree(Vec<usize>, SyntaxTreeNode),
    Reset,
}

struct ChannelFrontend(mpsc::UnboundedSender<FrontendCall>);

#[async_trait]
impl SyntaxTreeViewFrontend for ChannelFrontend {
    async fn set_cursor_pos(&self, pos: usize) -> Result<()> {
        let _ = self.0.send(FrontendCall::Cursor(pos));
        Ok(())
    }

    async fn set_sub_tree(&self, path: Vec<usize>, tree: SyntaxTreeNode) -> Result<()> {
        let _ = self.0.send(FrontendCall::SubTree(path, tree));
        Ok(())
    }

    async fn reset_tree(&self) -> Result<()> {
        let _ = self.0.send(FrontendCall::Reset);
        Ok(())
    }
}

/// Backend whose handler blocks until released.
#[derive(Default)]
struct GatedBackend {
    gate: Notify,
    regions: Mutex<Vec<(usize, usize)>>,
}

#[async_trait]
impl SyntaxTreeViewBackend for GatedBackend {
    async fn clear_marked_region(&self) -> Result<()> {
        Ok(())
    }

    async fn set_marked_region(&self, start_pos: usize, end_pos: usize) -> Result<()> {
        self.gate.notified().await;
        self.regions.lock().unwrap().push((start_pos, end_pos));
        Ok(())
    }
}

fn sample_tree() -> SyntaxTreeNode {
    SyntaxTreeNode::new("SourceFile", 0, 42)
        .with_child(
            SyntaxTreeNode::new("FunctionDeclaration", 0, 30)
                .with_property("statements")
                .with_child(SyntaxTreeNode::new("Identifier", 9, 12).with_property("name"))
                .with_child(SyntaxTreeNode::new("Block", 15, 30).with_property("body")),
        )
        .with_child(SyntaxTreeNode::new("EndOfFileToken", 42, 42).with_property("endOfFileToken"))
}

#[tokio::test]
async fn test_sub_tree_arrives_structurally_identical() {
    let (host, view) = tcp_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    view.register_implementation(Arc::new(FrontendDispatcher(Arc::new(ChannelFrontend(tx)))))
        .unwrap();

    let tree = sample_tree();
    let frontend: FrontendProxy = host.proxy();
    frontend.set_sub_tree(&[], &tree).unwrap();

    let received = tokio::time::timeout(Duration::from_secs(1), rx.recv())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(received, FrontendCall::SubTree(vec![], tree));
}

#[tokio::test]
async fn test_notifications_keep_send_order() {
    let (host, view) = tcp_pair().await;
    let (tx, mut rx) = mpsc::unbounded_channel();
    view.register_implementation(Arc::new(FrontendDispatcher(Arc::new(ChannelFrontend(tx)))))
        .unwrap();

    let frontend: FrontendProxy = host.proxy();
    frontend.reset_tree().unwrap();
    for pos in 0..200 {
        frontend.set_cursor_pos(pos).unwrap();
    }

    assert_eq!(rx.recv().await.unwrap(), FrontendCall::Reset);
    for pos in 0..200 {
        assert_eq!(rx.recv().await.unwrap(), FrontendCall::Cursor(pos));
    }
}

#[tokio::test]
async fn test_marked_region_notification_does_not_wait_for_handler() {
    let (view, host) = tcp_pair().await;
    let backend = Arc::new(GatedBackend::default());
    host.register_implementation(Arc::new(BackendDispatcher(backend.clone())))
        .unwrap();

    let proxy: BackendProxy = view.proxy();
    // Returns while the handler is still parked on the gate.
    proxy.set_marked_region(10, 20).unwrap();
    assert!(backend.regions.lock().unwrap().is_empty());

    // Release the handler once it is waiting.
    tokio::time::timeout(Duration::from_secs(1), async {
        loop {
            backend.gate.notify_one();
            if !backend.regions.lock().unwrap().is_empty() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("handler runs");
    assert_eq!(*backend.regions.lock().unwrap(), vec![(10, 20)]);
}

#[tokio::test]
async fn test_request_on_dropped_connection_fails_with_channel_closed() {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let (client, server) = tokio::join!(TcpStream::connect(addr), listener.accept());
    let view = Endpoint::open(client.unwrap());
    let (server, _) = server.unwrap();

    let registry: astview_core::services::RegistryProxy = view.proxy();
    let call = tokio::spawn(async move { registry.register("1").await });

    // The peer never answers; it just goes away.
    tokio::time::sleep(Duration::from_millis(50)).await;
    drop(server);

    let result = tokio::time::timeout(Duration::from_secs(2), call)
        .await
        .expect("request must not hang")
        .unwrap();
    assert!(matches!(result, Err(RemotingError::ChannelClosed)));
}

#[tokio::test]
async fn test_call_on_unserved_contract_reports_method_not_found() {
    let (host, _view) = tcp_pair().await;
    let registry: astview_core::services::RegistryProxy = host.proxy();

    match registry.register("1").await {
        Err(RemotingError::MethodNotFound { contract, method }) => {
            assert_eq!(contract, "Registry");
            assert_eq!(method, "register");
        }
        other => panic!("Expected MethodNotFound, got: {:?}", other),
    }
    // The channel survives the failure.
    assert!(!host.is_closed());
}

#[tokio::test]
async fn test_serving_a_contract_twice_fails_fast() {
    let (_host, view) = tcp_pair().await;
    let (tx, _rx) = mpsc::unbounded_channel();
    let frontend = Arc::new(ChannelFrontend(tx));

    view.register_implementation(Arc::new(FrontendDispatcher(frontend.clone())))
        .unwrap();
    let err = view
        .register_implementation(Arc::new(FrontendDispatcher(frontend)))
        .unwrap_err();
    assert!(matches!(err, RemotingError::ContractAlreadyRegistered { .. }));
}
