//! Evo Driver CLI - Run a OneMax search from JSON configuration.

#[cfg(feature = "dhat-heap")]
#[global_allocator]
static ALLOC: dhat::Alloc = dhat::Alloc;

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Instant;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use evo_driver::{
    compute::evaluation::{Candidate, EvaluateFn, FitnessSlot, WorkerContext, WorkerError},
    compute::scheduler::{OperatorCategory, OperatorRegistry},
    compute::{GenerationDriver, Produced},
    schema::{BackendConfig, DriverConfig, Fitness, PoolConfig},
};

const GENOME_LENGTH: usize = 64;
const POPULATION_SIZE: usize = 8;

/// Bit string candidate; fitness is the number of set bits.
struct Bits {
    id: String,
    bits: String,
    fitness: FitnessSlot,
}

impl Bits {
    fn new(id: u64, bits: String) -> Self {
        Self {
            id: id.to_string(),
            bits,
            fitness: FitnessSlot::new(),
        }
    }

    fn score(&self) -> f64 {
        self.fitness.get().map_or(0.0, |f| f.values[0])
    }
}

impl Candidate for Bits {
    fn id(&self) -> &str {
        &self.id
    }

    fn phenotype(&self) -> &str {
        &self.bits
    }

    fn fitness(&self) -> &FitnessSlot {
        &self.fitness
    }
}

#[derive(Debug, Clone, Copy)]
enum Variation {
    FlipOne,
    FlipMany,
    Crossover,
    Rotate,
}

fn flip(bits: &mut [u8], index: usize) {
    bits[index] = if bits[index] == b'1' { b'0' } else { b'1' };
}

fn vary(
    variation: Variation,
    population: &[Arc<Bits>],
    rng: &mut StdRng,
) -> (Vec<Arc<Bits>>, Option<String>) {
    let first = Arc::clone(&population[rng.gen_range(0..population.len())]);
    let mut bits = first.bits.clone().into_bytes();

    let parents = match variation {
        Variation::FlipOne => {
            flip(&mut bits, rng.gen_range(0..GENOME_LENGTH));
            vec![first]
        }
        Variation::FlipMany => {
            for index in 0..GENOME_LENGTH {
                if rng.gen_bool(4.0 / GENOME_LENGTH as f64) {
                    flip(&mut bits, index);
                }
            }
            vec![first]
        }
        Variation::Crossover => {
            let second = Arc::clone(&population[rng.gen_range(0..population.len())]);
            for (bit, other) in bits.iter_mut().zip(second.bits.bytes()) {
                if rng.gen_bool(0.5) {
                    *bit = other;
                }
            }
            vec![first, second]
        }
        Variation::Rotate => {
            bits.rotate_left(rng.gen_range(1..GENOME_LENGTH));
            vec![first]
        }
    };

    let bits = String::from_utf8(bits).ok();
    // Unchanged genomes are not offspring.
    let bits = bits.filter(|b| parents.iter().all(|p| &p.bits != b));
    (parents, bits)
}

fn main() {
    #[cfg(feature = "dhat-heap")]
    let _profiler = dhat::Profiler::new_heap();

    env_logger::init();

    let args: Vec<String> = std::env::args().collect();

    if args.len() < 2 {
        eprintln!("Usage: {} <config.json> [generations]", args[0]);
        eprintln!();
        eprintln!("Run a OneMax search with adaptive operator scheduling.");
        eprintln!();
        eprintln!("Arguments:");
        eprintln!("  config.json  Path to driver configuration file");
        eprintln!("  generations  Number of generations (default: 50)");
        eprintln!();
        eprintln!("Example configuration is generated with --example flag.");
        std::process::exit(1);
    }

    if args[1] == "--example" {
        print_example_config();
        return;
    }

    let config_path = PathBuf::from(&args[1]);
    let generations: u64 = args.get(2).and_then(|s| s.parse().ok()).unwrap_or(50);

    let config_str = fs::read_to_string(&config_path).unwrap_or_else(|e| {
        eprintln!("Error reading config file: {}", e);
        std::process::exit(1);
    });

    let config: DriverConfig = serde_json::from_str(&config_str).unwrap_or_else(|e| {
        eprintln!("Error parsing config: {}", e);
        std::process::exit(1);
    });

    let seed = config.random_seed.unwrap_or_else(rand::random);
    let mut rng = StdRng::seed_from_u64(seed);

    let mut registry = OperatorRegistry::new();
    let operators = [
        ("flip-one", OperatorCategory::DefaultOn, Variation::FlipOne),
        ("flip-many", OperatorCategory::DefaultOn, Variation::FlipMany),
        ("crossover", OperatorCategory::DefaultOn, Variation::Crossover),
        ("rotate", OperatorCategory::DefaultOff, Variation::Rotate),
    ];
    for (name, category, variation) in operators {
        if let Err(e) = registry.register(name, category, variation) {
            eprintln!("Error registering operator: {}", e);
            std::process::exit(1);
        }
    }

    let function: Arc<EvaluateFn<Bits>> =
        Arc::new(|candidate: &Bits, _: &WorkerContext<'_, Bits>| {
            let ones = candidate.bits.bytes().filter(|&b| b == b'1').count();
            Ok::<_, WorkerError>(Fitness::new(vec![ones as f64]))
        });

    println!("OneMax Search");
    println!("=============");
    println!("Genome length: {}", GENOME_LENGTH);
    println!("Population: {}", POPULATION_SIZE);
    println!("Offspring per generation: {}", config.scheduler.lambda);
    println!("Generations: {}", generations);
    println!("Seed: {}", seed);
    println!();

    let mut driver = GenerationDriver::new(registry, config, Some(function)).unwrap_or_else(|e| {
        eprintln!("Error creating driver: {}", e);
        std::process::exit(1);
    });

    let mut next_id = 0u64;
    let mut population: Vec<Arc<Bits>> = (0..POPULATION_SIZE)
        .map(|_| {
            next_id += 1;
            let bits = (0..GENOME_LENGTH)
                .map(|_| if rng.gen_bool(0.5) { '1' } else { '0' })
                .collect();
            Arc::new(Bits::new(next_id, bits))
        })
        .collect();
    for candidate in &population {
        driver.evaluator_mut().evaluate(candidate);
    }
    if let Err(e) = driver.evaluate_offspring() {
        eprintln!("Error evaluating initial population: {}", e);
        std::process::exit(1);
    }

    println!("Generation,Best,{}", driver.evaluator().csv_header());
    let start = Instant::now();

    for generation in 0..generations {
        let produced = driver.produce_offspring(|_, &variation| {
            let (parents, bits) = vary(variation, &population, &mut rng);
            match bits {
                Some(bits) => {
                    next_id += 1;
                    Produced {
                        parents,
                        children: vec![Bits::new(next_id, bits)],
                    }
                }
                None => Produced::failed(),
            }
        });
        if let Err(e) = produced.and_then(|_| driver.evaluate_offspring()) {
            eprintln!("Error in generation {}: {}", generation, e);
            std::process::exit(1);
        }
        let row = driver.evaluator().csv_row();

        let children = driver
            .finish_generation(&population, |a, b| a.score() > b.score())
            .unwrap_or_else(|e| {
                eprintln!("Error in generation {}: {}", generation, e);
                std::process::exit(1);
            });

        population.extend(children);
        population.sort_by(|a, b| b.score().total_cmp(&a.score()));
        population.dedup_by(|a, b| a.bits == b.bits);
        population.truncate(POPULATION_SIZE);

        let best = population[0].score();
        println!("{},{},{}", generation, best, row);

        if best as usize == GENOME_LENGTH || driver.stop_requested() {
            break;
        }
    }

    let elapsed = start.elapsed();
    println!();
    println!("Operator summary: {}", driver.scheduler().summary());
    for (index, stats) in driver.scheduler().stats().iter().enumerate() {
        println!(
            "  {}: enabled={} dormant={} weight={:?}",
            stats.name(),
            stats.enabled(),
            stats.dormant(),
            driver.scheduler().weight(index)
        );
    }
    driver.evaluator().log_statistics();
    let totals = driver.evaluator().statistics().total;
    println!(
        "Evaluations: {} actual, {} duplicate, {} cache hits",
        totals.actual, totals.duplicate, totals.cache_hit
    );
    println!("Best: {}", population[0].bits);
    println!("Time: {:.2}s", elapsed.as_secs_f32());
}

fn print_example_config() {
    let mut config = DriverConfig::default();
    config.evaluator.concurrency = 4;
    config.evaluator.backend = BackendConfig::Pool(PoolConfig::default());
    config.random_seed = Some(42);
    println!(
        "{}",
        serde_json::to_string_pretty(&config).unwrap_or_else(|e| {
            eprintln!("Error serializing config: {}", e);
            std::process::exit(1);
        })
    );
}
