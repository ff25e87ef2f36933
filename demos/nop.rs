/*
 * This example just does 1 million NOPs in batches,
 * stressing the ring and io_uring without triggering
 * any device IO.
 */

use ringio::{Error, Op};

const TOTAL: u64 = 1024 * 1024;

fn main() -> ringio::Result<()> {
    // start the ring
    let mut config = ringio::Config::default();
    config.print_profile_on_drop = true;
    let mut ring = config.start()?;

    let pre = std::time::Instant::now();

    let mut queued = 0;
    let mut reaped = 0;

    while reaped < TOTAL {
        // fill every free slot
        while queued < TOTAL {
            match ring.get_sqe() {
                Ok(sqe) => {
                    sqe.prepare(&Op::Nop);
                    sqe.set_user_data(queued);
                    queued += 1;
                }
                Err(Error::QueueFull) => break,
                Err(e) => return Err(e),
            }
        }

        ring.submit_and_wait(1)?;

        let ready = ring.cq_ready();
        for _ in 0..ready {
            let cqe = ring.peek_cqe()?;
            if let Err(e) = cqe.result() {
                eprintln!("nop {} failed: {}", cqe.user_data(), e);
            }
            ring.cqe_seen();
        }
        reaped += u64::from(ready);
    }

    let elapsed = pre.elapsed();
    println!(
        "{} nops in {:?} ({:.0} ops/s)",
        TOTAL,
        elapsed,
        TOTAL as f64 / elapsed.as_secs_f64(),
    );

    Ok(())
}
