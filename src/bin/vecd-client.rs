use structopt::StructOpt;
use vecd::client::VectorClient;
use vecd::protocol::QueueNames;
use vecd::{CreateOutcome, Result};

#[derive(StructOpt)]
enum Args {
    #[structopt(name = "create")]
    Create { name: String, size: i32 },

    #[structopt(name = "set")]
    Set { name: String, pos: i32, value: i32 },

    #[structopt(name = "get")]
    Get { name: String, pos: i32 },

    #[structopt(name = "destroy")]
    Destroy { name: String },
}

fn main() -> Result<()> {
    let client = VectorClient::new(QueueNames::default());

    match Args::from_args() {
        Args::Create { name, size } => match client.create(&name, size)? {
            CreateOutcome::Created => println!("Created {}", name),
            CreateOutcome::AlreadyExists => println!("{} already exists", name),
        },

        Args::Set { name, pos, value } => client.set(&name, pos, value)?,

        Args::Get { name, pos } => println!("{}", client.get(&name, pos)?),

        Args::Destroy { name } => client.destroy(&name)?,
    };

    Ok(())
}
