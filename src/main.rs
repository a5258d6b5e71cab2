use std::process::ExitCode;

use clap::Parser;
use tracing::{error, info};

use sv::controller::Controller;
use sv::domain::{SVConfig, SVError};
use sv::logging;
use sv::model::{Model, Status};
use sv::ui::TableUI;

fn main() -> ExitCode {
    let config = SVConfig::parse();
    if let Err(e) = logging::init(&config) {
        eprintln!("Logging disabled: {e}");
    }

    let result = run(&config);
    ratatui::restore();
    match result {
        Err(e) => {
            error!("Exiting with error: {e}");
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
        Ok(_) => {
            info!("Bye");
            ExitCode::SUCCESS
        }
    }
}

fn run(config: &SVConfig) -> Result<(), SVError> {
    let mut terminal = ratatui::init();
    let size = terminal.size()?;

    let mut model = Model::init(config, size.width as usize, size.height as usize)?;
    if let Some(path) = &config.path {
        model.open(path);
    }
    let ui = TableUI::new();
    let controller = Controller::new(config);

    while model.status != Status::QUITTING {
        model.poll_load();

        // Render the current view
        terminal.draw(|f| ui.draw(&model, f))?;

        // Handle events and map to a Message
        if let Some(message) = controller.handle_event(&model)? {
            model.update(message)?;
        };
    }

    Ok(())
}
