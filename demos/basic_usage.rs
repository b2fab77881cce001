//! Basic usage example of the bytelane data path

use bytelane::{
    ByteBudget, CallbackData, ContiguousConvertor, Endpoint, Fragment, ModuleConfigBuilder,
    Result, StridedConvertor, Tag, TransferModule,
};
use std::{
    sync::{
        atomic::{AtomicUsize, Ordering},
        Arc,
    },
    time::Duration,
};

fn main() -> Result<()> {
    // Initialize logging
    env_logger::init();

    println!("Bytelane Data Path Example");
    println!("==========================");

    let config = ModuleConfigBuilder::new()
        .eager_limit(4096)
        .max_send_size(64 * 1024)
        .eager_slots(8, 32)
        .max_slots(2, 8)
        .allocation_timeout(Duration::from_millis(100))
        .build()?;

    println!("Creating transfer module");
    let module = TransferModule::new(config)?;
    let peer = Endpoint::new(1, "peer-0");
    println!("  Eager limit: {} bytes", module.limits().eager_limit);
    println!("  Max send size: {} bytes", module.limits().max_send_size);

    // Receive callbacks are looked up by tag
    let delivered = Arc::new(AtomicUsize::new(0));
    {
        let delivered = delivered.clone();
        module.register(
            Tag(7),
            Arc::new(move |fragment: &Fragment, tag: Tag, _: &CallbackData| {
                delivered.fetch_add(fragment.payload_len(), Ordering::Relaxed);
                println!("  Tag {} delivered {} bytes", tag.0, fragment.payload_len());
            }),
            Arc::new(()),
        );
    }

    // A small message is copied into an eager slot behind a header reserve
    println!("\nPreparing a small message...");
    let message = b"hello over bytelane".to_vec();
    let mut convertor = ContiguousConvertor::new(&message);
    let mut small =
        module.prepare_source(&peer, None, &mut convertor, ByteBudget::new(message.len(), 16))?;
    if let Some(buffer) = small.buffer_mut() {
        buffer[..16].fill(0xAB);
    }
    println!("  Tier: {}, segment: {} bytes", small.tier(), small.segment().length);
    module.deliver(&small, Tag(7));
    module.free(small)?;

    // A non-contiguous payload is gathered into a max slot
    println!("\nPreparing a strided payload...");
    let matrix = vec![3u8; 64 * 256];
    let mut strided = StridedConvertor::new(&matrix, 128, 256, 64)?;
    let budget = ByteBudget::new(64 * 128, 8);
    let gathered = module.prepare_source(&peer, None, &mut strided, budget)?;
    println!("  Tier: {}, payload: {} bytes", gathered.tier(), gathered.payload_len());
    module.free(gathered)?;

    // A large contiguous payload is registered and sent without copying
    println!("\nPreparing a large payload in place...");
    let bulk = vec![9u8; 256 * 1024];
    let mut convertor = ContiguousConvertor::new(&bulk);
    let budget = ByteBudget::new(bulk.len(), 0);
    let in_place = module.prepare_source(&peer, None, &mut convertor, budget)?;
    println!(
        "  Tier: {}, holds registration: {}",
        in_place.tier(),
        in_place.holds_registration()
    );
    if let Err(e) = module.send(&peer, &in_place, Tag(7)) {
        println!("  Send not available in this build: {}", e);
    }
    module.free(in_place)?;

    // Consecutive receive parts share the registration of the first
    println!("\nPreparing receive targets...");
    let inbox = vec![0u8; 8192];
    let mut convertor = ContiguousConvertor::new(&inbox);
    let first =
        module.prepare_destination(&peer, None, &mut convertor, ByteBudget::new(8192, 0))?;
    convertor.advance(4096)?;
    let second =
        module.prepare_destination(&peer, None, &mut convertor, ByteBudget::new(4096, 0))?;
    println!(
        "  Second part at offset {}, registration holders: {}",
        second.segment().address - first.segment().address,
        second.registration().map_or(0, |r| r.ref_count())
    );
    module.free(second)?;
    module.free(first)?;

    // Display statistics
    let stats = module.stats();
    println!("\nModule Statistics:");
    println!("  Eager: {}", stats.eager.summary());
    println!("  Max: {}", stats.max.summary());
    println!("  User: {}", stats.user.summary());
    println!("  Registrations: {}", stats.registrations.registered);
    println!("  Delivered bytes: {}", delivered.load(Ordering::Relaxed));

    let report = module.finalize();
    println!("\nFinalized cleanly: {}", report.is_clean());

    Ok(())
}
