pub mod argparse;
pub mod barrier;
pub mod spinlock;
