use std::{
    io::{stdout, Stdout},
    path::PathBuf,
    time::Duration,
};

use crate::gui::error::GuiError;

use crossterm::{
    event::{self, Event, KeyCode, KeyEventKind},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    prelude::*,
    widgets::{
        block::{Position, Title},
        *,
    },
    Terminal,
};

type Term = Terminal<CrosstermBackend<Stdout>>;

/// Lets the user pick the servo controller's command port from
/// `available_ports`. Returns `None` if the user quits, or if there is
/// nothing to pick from.
///
/// The terminal is handed back in its normal mode even when drawing or
/// reading input fails.
pub fn device_selector(mut available_ports: Vec<PathBuf>) -> Result<Option<PathBuf>, GuiError> {
    if available_ports.is_empty() {
        return Ok(None);
    }

    enable_raw_mode()?;
    let picked = stdout()
        .execute(EnterAlternateScreen)
        .map_err(GuiError::from)
        .and_then(|_| Terminal::new(CrosstermBackend::new(stdout())).map_err(GuiError::from))
        .and_then(|mut terminal| pick(&mut terminal, &available_ports));

    let restored = disable_raw_mode().and_then(|_| stdout().execute(LeaveAlternateScreen).map(|_| ()));
    let picked = picked?;
    restored?;

    Ok(picked.map(|i| available_ports.swap_remove(i)))
}

/// Runs the selection loop, returning the index of the chosen port.
fn pick(terminal: &mut Term, ports: &[PathBuf]) -> Result<Option<usize>, GuiError> {
    terminal.clear()?;
    let mut state = ListState::default().with_selected(Some(0));
    loop {
        terminal.draw(|frame| draw(frame, ports, &mut state))?;

        if !event::poll(Duration::from_millis(16))? {
            continue;
        }
        let Event::Key(key) = event::read()? else {
            continue;
        };
        if key.kind != KeyEventKind::Press {
            continue;
        }
        let n = ports.len();
        let cursor = state.selected().unwrap_or(0);
        match key.code {
            KeyCode::Down | KeyCode::Char('j') => state.select(Some((cursor + 1) % n)),
            KeyCode::Up | KeyCode::Char('k') => state.select(Some((cursor + n - 1) % n)),
            KeyCode::Enter => return Ok(Some(cursor)),
            KeyCode::Char('q') | KeyCode::Esc => return Ok(None),
            _ => {}
        }
    }
}

fn draw(frame: &mut Frame, ports: &[PathBuf], state: &mut ListState) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([Constraint::Min(3), Constraint::Length(1)])
        .split(frame.size());

    let keys = Title::from(Line::from(vec![
        " <Up>/<Down> ".cyan().bold(),
        "move ".into(),
        " <Enter> ".cyan().bold(),
        "connect ".into(),
        " <Q> ".cyan().bold(),
        "quit ".into(),
    ]));
    let block = Block::default()
        .title(Title::from(" Servo Controller ".bold()).alignment(Alignment::Left))
        .title(keys.alignment(Alignment::Right).position(Position::Bottom))
        .borders(Borders::ALL)
        .border_type(BorderType::Rounded);
    let list = List::new(ports.iter().map(|p| p.to_string_lossy()))
        .block(block)
        .highlight_symbol("> ")
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));
    frame.render_stateful_widget(list, rows[0], state);

    let summary = format!(
        " {} serial device{} found",
        ports.len(),
        if ports.len() == 1 { "" } else { "s" }
    );
    frame.render_widget(Paragraph::new(summary).dim(), rows[1]);
}
