//! Cross-node routing: a hub, a proxy, and a hosted app exchanging
//! registered routes and JSON-RPC traffic over in-memory transports.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::{json, Value};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use zonegrid_router::{Router, TransportSend};
use zonegrid_rpc::{
    method_fn, CallbackObject, CallerRef, Registry, RpcCorrelator, ServiceObject, ServiceRef,
};
use zonegrid_types::rpc::id_key;
use zonegrid_types::{Envelope, ZoneGridResult};

const HUB: &str = "user@zone";
const PROXY: &str = "user@zone/phone";
const APP: &str = "user@zone/phone/app1";

/// Maps next-hop identifiers (zone addresses) to router instances, the way a
/// real transport maps them to open connections.
#[derive(Default)]
struct TestNet {
    nodes: DashMap<String, Arc<Router>>,
}

/// Per-node send function. A node has no connection to itself, so next hops
/// resolving to the own address are dropped like any unknown hop.
struct NetSend {
    net: Arc<TestNet>,
    own: String,
}

#[async_trait]
impl TransportSend for NetSend {
    async fn send(&self, message: Envelope, next_hop: &str) -> ZoneGridResult<()> {
        if next_hop == self.own {
            return Ok(());
        }
        let target = self.net.nodes.get(next_hop).map(|n| Arc::clone(n.value()));
        if let Some(target) = target {
            target.on_message_received(message, Some(next_hop)).await;
        }
        Ok(())
    }
}

fn node(net: &Arc<TestNet>, address: &str) -> (Arc<Router>, Arc<RpcCorrelator>) {
    let correlator = RpcCorrelator::new(Arc::new(Registry::new()));
    let router = Router::new(correlator.clone());
    router.set_own_address(address);
    correlator.set_session_id(address);
    router.set_send(Arc::new(NetSend {
        net: net.clone(),
        own: address.to_string(),
    }));
    net.nodes.insert(address.to_string(), router.clone());
    (router, correlator)
}

async fn link(a: &Arc<Router>, a_addr: &str, b: &Arc<Router>, b_addr: &str) {
    // each side stores a route towards the other
    let reg = a.create_register_message(b_addr, a_addr).unwrap();
    a.on_message_received(reg, None).await;
    let reg = b.create_register_message(a_addr, b_addr).unwrap();
    b.on_message_received(reg, None).await;
}

#[tokio::test]
async fn test_proxy_invokes_hub_service_and_receives_response() {
    let net = Arc::new(TestNet::default());
    let (hub_router, hub) = node(&net, HUB);
    let (proxy_router, proxy) = node(&net, PROXY);
    link(&hub_router, HUB, &proxy_router, PROXY).await;

    let handler = method_fn(|params, responder, _caller| async move {
        responder.result(json!({ "echo": params })).await;
    });
    let info = hub
        .registry()
        .register_object(
            ServiceObject::new("http://zonegrid.io/api/echo", "Echo", "echo service")
                .method("say", handler),
        )
        .unwrap();

    let service = ServiceRef::Service {
        api: info.api.clone(),
        id: info.id.clone(),
        address: Some(HUB.to_string()),
    };
    let rpc = proxy.create_rpc(&service, "say", json!(["hello"])).unwrap();

    let (tx, rx) = std::sync::mpsc::channel();
    proxy
        .execute_rpc(
            rpc,
            Some(Box::new(move |value: Value| {
                let _ = tx.send(value);
            })),
            None,
            None,
        )
        .await
        .unwrap();

    // the in-memory net delivers inline, so the round trip has completed
    assert_eq!(rx.try_recv().unwrap(), json!({"echo": ["hello"]}));
}

#[tokio::test]
async fn test_multi_hop_delivery_via_longest_registered_prefix() {
    let net = Arc::new(TestNet::default());
    let (hub_router, hub) = node(&net, HUB);
    let (proxy_router, _proxy) = node(&net, PROXY);
    let (app_router, app) = node(&net, APP);
    link(&hub_router, HUB, &proxy_router, PROXY).await;
    link(&proxy_router, PROXY, &app_router, APP).await;

    // the hub has no session to the app; only the proxy prefix is known
    let hits = Arc::new(AtomicUsize::new(0));
    let handler = {
        let hits = hits.clone();
        method_fn(move |_params, _responder, _caller| {
            let hits = hits.clone();
            async move {
                hits.fetch_add(1, Ordering::SeqCst);
            }
        })
    };
    app.register_callback_object(CallbackObject::with_id("watcher").method("onEvent", handler));

    let target = ServiceRef::Callback {
        rpc_id: "watcher".to_string(),
        from: Some(APP.to_string()),
    };
    hub.notify(&target, "onEvent", json!({"n": 1})).await.unwrap();

    assert_eq!(hits.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn test_streaming_callbacks_fan_out_across_nodes() {
    let net = Arc::new(TestNet::default());
    let (hub_router, hub) = node(&net, HUB);
    let (proxy_router, proxy) = node(&net, PROXY);
    link(&hub_router, HUB, &proxy_router, PROXY).await;

    // hub-side feed service pushes three events through the caller's ref
    let hub_for_handler = hub.clone();
    let feed = method_fn(move |_params, responder, caller: CallerRef| {
        let hub = hub_for_handler.clone();
        async move {
            let target = caller.service_ref().unwrap();
            for n in 0..3 {
                hub.notify(&target, "onEvent", json!({ "n": n })).await.unwrap();
            }
            responder.result(json!({"subscribed": true})).await;
        }
    });
    let info = hub
        .registry()
        .register_object(
            ServiceObject::new("http://zonegrid.io/api/feed", "Feed", "event feed")
                .method("subscribe", feed),
        )
        .unwrap();

    // proxy-side: a long-lived callback object keyed to the request id
    let events = Arc::new(AtomicUsize::new(0));
    let on_event = {
        let events = events.clone();
        method_fn(move |_params, _responder, _caller| {
            let events = events.clone();
            async move {
                events.fetch_add(1, Ordering::SeqCst);
            }
        })
    };

    let service = ServiceRef::Service {
        api: info.api.clone(),
        id: info.id.clone(),
        address: Some(HUB.to_string()),
    };
    let rpc = proxy.create_rpc(&service, "subscribe", json!([])).unwrap();
    let rpc_id = id_key(rpc.id().unwrap());
    proxy.register_callback_object(CallbackObject::with_id(&rpc_id).method("onEvent", on_event));

    let (tx, rx) = std::sync::mpsc::channel();
    proxy
        .execute_rpc(
            rpc,
            Some(Box::new(move |value: Value| {
                let _ = tx.send(value);
            })),
            None,
            None,
        )
        .await
        .unwrap();

    assert_eq!(events.load(Ordering::SeqCst), 3);
    assert_eq!(rx.try_recv().unwrap(), json!({"subscribed": true}));

    // the callback object outlives the terminal response
    proxy.unregister_callback_object(&rpc_id);
}
