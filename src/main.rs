use workload::{clock_convergence, divergent_writers};
pub mod workload;

fn main() {
    let rt = tokio::runtime::Runtime::new().unwrap();
    rt.block_on(async_main());
}

async fn async_main() {
    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        DIVERGENT WRITER RECONCILIATION                     ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    // Small scale: a handful of writers with short offline sessions.
    let stats = divergent_writers(3, 20, 7).await;
    stats.print();

    // Medium scale: more writers, longer sessions.
    let stats = divergent_writers(8, 60, 11).await;
    stats.print();

    println!("\n╔════════════════════════════════════════════════════════════╗");
    println!("║        MERKLE-CLOCK CONVERGENCE                            ║");
    println!("╚════════════════════════════════════════════════════════════╝");

    let stats = clock_convergence(4, 10, 13).await;
    stats.print();

    let stats = clock_convergence(10, 25, 17).await;
    stats.print();

    println!("\n✓ All workloads completed successfully!");
}
