use clap::{App, Arg, ArgMatches, SubCommand};
use bytelane::{
    error::BytelaneError,
    prepare::{select_source_path, SourceConditions},
    ByteBudget, ContiguousConvertor, Endpoint, ModuleConfigBuilder, ModuleLimits, Result,
    StridedConvertor, Tier, TransferModule,
};
use std::time::Instant;

fn main() -> Result<()> {
    env_logger::init();

    let limit_args = || {
        vec![
            Arg::with_name("eager_limit")
                .long("eager-limit")
                .value_name("BYTES")
                .help("Eager limit")
                .default_value("4096")
                .takes_value(true),
            Arg::with_name("max_send")
                .long("max-send")
                .value_name("BYTES")
                .help("Max send size")
                .default_value("65536")
                .takes_value(true),
        ]
    };

    let matches = App::new("bytelane-cli")
        .version(env!("CARGO_PKG_VERSION"))
        .about("Bytelane data-path inspection tool")
        .subcommand(
            SubCommand::with_name("plan")
                .about("Show how a send of the given shape would be prepared")
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("BYTES")
                        .help("Requested payload size")
                        .required(true)
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("reserve")
                        .short("r")
                        .long("reserve")
                        .value_name("BYTES")
                        .help("Header bytes reserved ahead of the payload")
                        .default_value("0")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("registered")
                        .long("registered")
                        .help("The payload already has a registration"),
                )
                .arg(
                    Arg::with_name("scattered")
                        .long("scattered")
                        .help("The payload is non-contiguous"),
                )
                .args(&limit_args()),
        )
        .subcommand(
            SubCommand::with_name("exercise")
                .about("Run prepare/free round trips and print tier statistics")
                .arg(
                    Arg::with_name("count")
                        .short("c")
                        .long("count")
                        .value_name("COUNT")
                        .help("Number of round trips")
                        .default_value("1000")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("size")
                        .short("s")
                        .long("size")
                        .value_name("BYTES")
                        .help("Payload size per round trip")
                        .default_value("1024")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("reserve")
                        .short("r")
                        .long("reserve")
                        .value_name("BYTES")
                        .help("Header bytes reserved ahead of the payload")
                        .default_value("0")
                        .takes_value(true),
                )
                .arg(
                    Arg::with_name("scattered")
                        .long("scattered")
                        .help("Pack from a strided payload"),
                )
                .arg(
                    Arg::with_name("lock")
                        .long("lock")
                        .help("Page-lock registered memory with mlock"),
                )
                .args(&limit_args()),
        )
        .subcommand(SubCommand::with_name("info").about("Show version and default limits"))
        .get_matches();

    match matches.subcommand() {
        ("plan", Some(plan_matches)) => handle_plan(plan_matches),
        ("exercise", Some(exercise_matches)) => handle_exercise(exercise_matches),
        ("info", Some(_)) => show_info(),
        _ => {
            println!("Use --help for usage information");
            Ok(())
        }
    }
}

fn parse_usize(matches: &ArgMatches, name: &str) -> Result<usize> {
    matches
        .value_of(name)
        .ok_or_else(|| BytelaneError::invalid_parameter(name, "Missing value"))?
        .parse()
        .map_err(|_| BytelaneError::invalid_parameter(name, "Invalid number format"))
}

fn parse_limits(matches: &ArgMatches) -> Result<ModuleLimits> {
    let limits = ModuleLimits::new(
        parse_usize(matches, "eager_limit")?,
        parse_usize(matches, "max_send")?,
    );
    limits.validate()?;
    Ok(limits)
}

fn handle_plan(matches: &ArgMatches) -> Result<()> {
    let limits = parse_limits(matches)?;
    let budget = ByteBudget::new(parse_usize(matches, "size")?, parse_usize(matches, "reserve")?);
    let conditions = SourceConditions::evaluate(
        &limits,
        budget,
        matches.is_present("registered"),
        !matches.is_present("scattered"),
    );
    let path = select_source_path(&conditions);

    println!("Request: {} bytes + {} reserve", budget.size, budget.reserve);
    println!("  Limits: eager {} / max send {}", limits.eager_limit, limits.max_send_size);
    println!("  Conditions: {:?}", conditions);
    println!("  Path: {:?} ({} tier)", path, path.tier());
    if path.is_zero_copy() {
        println!("  Payload bound in place, no copy");
    } else {
        let prepared = if path.tier() == Tier::Max {
            budget.clamped_to(limits.max_send_size)
        } else {
            budget
        };
        println!(
            "  Payload packed: up to {} bytes, segment up to {} bytes",
            prepared.size,
            prepared.size + prepared.reserve
        );
    }

    Ok(())
}

fn handle_exercise(matches: &ArgMatches) -> Result<()> {
    let limits = parse_limits(matches)?;
    let count = parse_usize(matches, "count")?;
    let budget = ByteBudget::new(parse_usize(matches, "size")?, parse_usize(matches, "reserve")?);
    let scattered = matches.is_present("scattered");

    let config = ModuleConfigBuilder::new()
        .eager_limit(limits.eager_limit)
        .max_send_size(limits.max_send_size)
        .lock_registrations(matches.is_present("lock"))
        .build()?;
    let module = TransferModule::new(config)?;
    let endpoint = Endpoint::new(0, "loopback");

    // Strided payloads interleave 64-byte blocks with 64-byte gaps
    let blocks = budget.size.div_ceil(64).max(1);
    let payload = vec![0xA5u8; if scattered { blocks * 128 } else { budget.size }];

    println!("Exercising {} round trips of {} bytes...", count, budget.size);
    let start = Instant::now();
    let mut prepared_bytes = 0usize;
    for _ in 0..count {
        let fragment = if scattered {
            let mut convertor = StridedConvertor::new(&payload, 64, 128, blocks)?;
            module.prepare_source(&endpoint, None, &mut convertor, budget)?
        } else {
            let mut convertor = ContiguousConvertor::new(&payload);
            module.prepare_source(&endpoint, None, &mut convertor, budget)?
        };
        prepared_bytes += fragment.payload_len();
        module.free(fragment)?;
    }
    let elapsed = start.elapsed();

    let stats = module.stats();
    println!("Completed in {:?}", elapsed);
    println!("  Bytes prepared: {}", prepared_bytes);
    if count > 0 {
        println!("  Avg time per round trip: {:?}", elapsed / count as u32);
    }
    for tier in [Tier::Eager, Tier::Max, Tier::User] {
        println!("  {:>5}: {}", tier, stats.tier(tier).summary());
    }
    println!(
        "  Registrations: {} created, {} live, {} failures",
        stats.registrations.registered, stats.registrations.live, stats.registrations.failures
    );

    let report = module.finalize();
    println!("Finalize: {:?}", report);
    Ok(())
}

fn show_info() -> Result<()> {
    println!("Bytelane v{}", bytelane::VERSION);
    println!("  Default eager limit: {} bytes", bytelane::config::DEFAULT_EAGER_LIMIT);
    println!("  Default max send size: {} bytes", bytelane::config::DEFAULT_MAX_SEND_SIZE);
    println!("  Receive tags: {}", bytelane::config::TAG_COUNT);
    Ok(())
}
