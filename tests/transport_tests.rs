//! Transport seam tests: stub primitives, receive-callback table semantics
//! and a loopback binding that delivers sends to a peer's callbacks

use std::sync::{
    atomic::{AtomicUsize, Ordering},
    Arc, Mutex,
};

use bytelane::{
    ByteBudget, BytelaneError, CallbackData, CallbackTable, ContiguousConvertor, Endpoint,
    Fragment, ModuleConfigBuilder, Result, Tag, TransferModule, Transport,
};

/// Hands every send straight to the peer's receive callbacks
#[derive(Debug)]
struct LoopbackTransport {
    peer: Arc<CallbackTable>,
    delivered: AtomicUsize,
}

impl LoopbackTransport {
    fn new(peer: Arc<CallbackTable>) -> Self {
        Self {
            peer,
            delivered: AtomicUsize::new(0),
        }
    }
}

impl Transport for LoopbackTransport {
    fn send(&self, _endpoint: &Endpoint, fragment: &Fragment, tag: Tag) -> Result<()> {
        if self.peer.deliver(fragment, tag) {
            self.delivered.fetch_add(1, Ordering::SeqCst);
        }
        Ok(())
    }

    fn put(&self, _endpoint: &Endpoint, _fragment: &Fragment) -> Result<()> {
        Err(BytelaneError::not_implemented("put"))
    }

    fn get(&self, _endpoint: &Endpoint, _fragment: &Fragment) -> Result<()> {
        Err(BytelaneError::not_implemented("get"))
    }

    fn name(&self) -> &'static str {
        "loopback"
    }
}

fn small_module() -> TransferModule {
    let config = ModuleConfigBuilder::new()
        .eager_slots(2, 2)
        .max_slots(1, 1)
        .build()
        .unwrap();
    TransferModule::new(config).unwrap()
}

#[cfg(test)]
mod transport_tests {
    use super::*;

    /// Test: without a binding every primitive reports NotImplemented
    #[test]
    fn test_stub_primitives_not_implemented() {
        let module = small_module();
        let endpoint = Endpoint::new(1, "peer");
        let data = [1u8; 64];
        let mut convertor = ContiguousConvertor::new(&data);
        let fragment = module
            .prepare_source(&endpoint, None, &mut convertor, ByteBudget::new(64, 0))
            .unwrap();

        for result in [
            module.send(&endpoint, &fragment, Tag(0)),
            module.put(&endpoint, &fragment),
            module.get(&endpoint, &fragment),
        ] {
            let err = result.unwrap_err();
            assert!(matches!(err, BytelaneError::NotImplemented { .. }));
            assert!(!err.is_transient());
        }
        module.free(fragment).unwrap();
    }

    /// Test: re-registering a tag replaces the callback and its context
    #[test]
    fn test_last_registration_wins() {
        let module = small_module();
        let calls = Arc::new(Mutex::new(Vec::new()));

        for label in ["first", "second"] {
            let calls = calls.clone();
            let data: CallbackData = Arc::new(label);
            module.register(
                Tag(17),
                Arc::new(move |_fragment: &Fragment, tag: Tag, data: &CallbackData| {
                    let label = data.downcast_ref::<&str>().copied().unwrap_or("?");
                    calls.lock().unwrap().push((tag, label));
                }),
                data,
            );
        }

        let fragment = module.alloc(8).unwrap();
        assert!(module.deliver(&fragment, Tag(17)));
        assert!(!module.deliver(&fragment, Tag(18)));
        assert_eq!(*calls.lock().unwrap(), vec![(Tag(17), "second")]);
        assert_eq!(module.stats().callbacks, 1);
        module.free(fragment).unwrap();
    }

    /// Test: a loopback binding delivers the prepared payload to the peer's
    /// callback with the sent tag
    #[test]
    fn test_loopback_send_reaches_peer_callback() {
        let peer = Arc::new(CallbackTable::new());
        let received = Arc::new(Mutex::new(Vec::new()));
        {
            let received = received.clone();
            peer.register(
                Tag(200),
                Arc::new(move |fragment: &Fragment, _tag: Tag, _data: &CallbackData| {
                    let payload = fragment
                        .segment_bytes()
                        .map(|bytes| bytes[fragment.reserve()..].to_vec())
                        .unwrap_or_default();
                    received.lock().unwrap().push(payload);
                }),
                Arc::new(()),
            );
        }

        let transport = Arc::new(LoopbackTransport::new(peer));
        let module = small_module().with_transport(transport.clone());
        let endpoint = Endpoint::new(2, "loopback");

        for message in [&b"hello"[..], &b"world!"[..]] {
            let mut convertor = ContiguousConvertor::new(message);
            let fragment = module
                .prepare_source(&endpoint, None, &mut convertor, ByteBudget::new(message.len(), 4))
                .unwrap();
            module.send(&endpoint, &fragment, Tag(200)).unwrap();
            module.free(fragment).unwrap();
        }
        let fragment = module.alloc(1).unwrap();
        module.send(&endpoint, &fragment, Tag(201)).unwrap();
        module.free(fragment).unwrap();

        assert_eq!(transport.delivered.load(Ordering::SeqCst), 2);
        assert_eq!(
            *received.lock().unwrap(),
            vec![b"hello".to_vec(), b"world!".to_vec()]
        );
        assert!(matches!(
            module.get(&endpoint, &module.alloc(1).unwrap()),
            Err(BytelaneError::NotImplemented { operation: "get" })
        ));
    }

    /// Test: a callback may register another tag while it runs
    #[test]
    fn test_callback_can_register_from_inside_delivery() {
        let table = Arc::new(CallbackTable::new());
        let inner_calls = Arc::new(AtomicUsize::new(0));
        {
            let table_in_callback = table.clone();
            let inner_calls = inner_calls.clone();
            table.register(
                Tag(1),
                Arc::new(move |_: &Fragment, _: Tag, _: &CallbackData| {
                    let inner_calls = inner_calls.clone();
                    table_in_callback.register(
                        Tag(2),
                        Arc::new(move |_: &Fragment, _: Tag, _: &CallbackData| {
                            inner_calls.fetch_add(1, Ordering::SeqCst);
                        }),
                        Arc::new(()),
                    );
                }),
                Arc::new(()),
            );
        }

        let module = small_module();
        let fragment = module.alloc(4).unwrap();
        assert!(table.deliver(&fragment, Tag(1)));
        assert!(table.deliver(&fragment, Tag(2)));
        assert_eq!(inner_calls.load(Ordering::SeqCst), 1);
        module.free(fragment).unwrap();
    }
}
