use dialoguer::console::style;

pub enum CommandStatus {
    Info,
    Success,
    Error,
    Warning,
}

pub fn print_command_status(status: CommandStatus, message: &str) {
    let indicator = match &status {
        CommandStatus::Info => style("›").cyan(),
        CommandStatus::Success => style("✓").green(),
        CommandStatus::Error => style("✗").red(),
        CommandStatus::Warning => style("!").yellow(),
    };

    eprintln!("{indicator} {message}");
}
