use std::time::Duration;
use tracing::trace;

use crate::domain::{Message, SVConfig, SVError};
use crate::model::Model;
use ratatui::crossterm::event::{self, Event, KeyCode, KeyEvent, KeyModifiers};

pub struct Controller {
    event_poll_time: u64,
}

impl Controller {
    pub fn new(config: &SVConfig) -> Self {
        Self {
            event_poll_time: config.event_poll_time,
        }
    }

    pub fn handle_event(&self, model: &Model) -> Result<Option<Message>, SVError> {
        if !event::poll(Duration::from_millis(self.event_poll_time))? {
            return Ok(None);
        }
        match event::read()? {
            Event::Key(key) if key.kind == event::KeyEventKind::Press => {
                Ok(self.handle_key(key, model.raw_keyevents()))
            }
            Event::Resize(width, height) => {
                Ok(Some(Message::Resize(width as usize, height as usize)))
            }
            _ => Ok(None),
        }
    }

    fn handle_key(&self, key: KeyEvent, raw: bool) -> Option<Message> {
        if raw {
            return Some(Message::RawKey(key));
        }
        let message = match (key.code, key.modifiers) {
            (KeyCode::Char('c'), KeyModifiers::CONTROL) => Some(Message::Quit),
            (KeyCode::Char('q'), _) => Some(Message::Quit),
            (KeyCode::Up | KeyCode::Char('k'), _) => Some(Message::MoveUp),
            (KeyCode::Down | KeyCode::Char('j'), _) => Some(Message::MoveDown),
            (KeyCode::Left | KeyCode::Char('h'), _) => Some(Message::MoveLeft),
            (KeyCode::Right | KeyCode::Char('l'), _) => Some(Message::MoveRight),
            (KeyCode::PageUp, _) => Some(Message::MovePageUp),
            (KeyCode::PageDown, _) => Some(Message::MovePageDown),
            (KeyCode::Home | KeyCode::Char('g'), _) => Some(Message::MoveBeginning),
            (KeyCode::End | KeyCode::Char('G'), _) => Some(Message::MoveEnd),
            (KeyCode::Char('o'), _) => Some(Message::Open),
            (KeyCode::Char('/'), _) => Some(Message::Filter),
            (KeyCode::Char('s'), _) => Some(Message::Sort),
            (KeyCode::Char('e'), _) => Some(Message::Export),
            (KeyCode::Char('?'), _) => Some(Message::Help),
            (KeyCode::Enter, _) => Some(Message::Enter),
            (KeyCode::Esc, _) => Some(Message::Exit),
            _ => None,
        };
        trace!("Mapped: {key:?} => {message:?}");
        message
    }
}
