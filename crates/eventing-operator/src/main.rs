use clap::Parser;
use eventing_operator::{
    cli::Command,
    crd::{KEVersionController, KnativeEventing},
    logging, run,
};
use kube::CustomResourceExt;
use snafu::{ResultExt, Snafu};

#[derive(Debug, Snafu)]
enum Error {
    #[snafu(display("failed to initialize logging"))]
    InitializeLogging { source: logging::Error },

    #[snafu(display("failed to serialize the CustomResourceDefinitions"))]
    SerializeCrds { source: serde_yaml::Error },

    #[snafu(display("failed to create the Kubernetes client"))]
    CreateClient { source: kube::Error },

    #[snafu(display("failed to run the operator"))]
    Run { source: run::Error },
}

#[snafu::report]
#[tokio::main]
async fn main() -> Result<(), Error> {
    match Command::parse() {
        Command::Crd => {
            for crd in [KnativeEventing::crd(), KEVersionController::crd()] {
                let yaml = serde_yaml::to_string(&crd).context(SerializeCrdsSnafu)?;
                print!("---\n{yaml}");
            }
        }
        Command::Run(args) => {
            logging::initialize_logging("EVENTING_OPERATOR_LOG", "eventing-operator")
                .context(InitializeLoggingSnafu)?;
            tracing::info!(
                version = env!("CARGO_PKG_VERSION"),
                "starting Knative Eventing operator"
            );

            let client = kube::Client::try_default()
                .await
                .context(CreateClientSnafu)?;
            run::run(client, args).await.context(RunSnafu)?;
        }
    }

    Ok(())
}
