use crate::config::Environment;
use tracing_subscriber::EnvFilter;

/// load `.env`, install the panic hook and the tracing subscriber for the environment
pub fn init(env: Environment) {
    dotenv::dotenv().ok();
    std::panic::set_hook(Box::new(tracing_panic::panic_hook));

    match env {
        Environment::Local => {
            tracing_subscriber::fmt()
                .with_ansi(true)
                .with_env_filter(EnvFilter::from_default_env())
                .with_file(true)
                .with_line_number(true)
                .pretty()
                .init();
        }
        Environment::Production | Environment::Develop => {
            tracing_subscriber::fmt()
                .with_ansi(false)
                .with_env_filter(EnvFilter::from_default_env())
                .with_file(true)
                .with_line_number(true)
                .json()
                .with_current_span(true)
                .with_span_list(false)
                .flatten_event(true)
                .init();
        }
    }
}
