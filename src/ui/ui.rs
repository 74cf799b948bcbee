use ratatui::{
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Paragraph, Tabs},
    Frame,
};
use ratatui_image::{picker::Picker, protocol::StatefulProtocol, Resize, StatefulImage};

use super::illust::IllustScreen;
use super::screen::ScreenName;
use super::search::{SearchScreen, SearchView};
use super::status::StatusBar;

const TITLE: &str = "vview";

/// Terminal rendering state. The screens own their data; this only keeps what
/// the terminal needs to draw the current page image.
pub struct Ui {
    picker: Option<Picker>,
    image_version: u64,
    image_state: Option<StatefulProtocol>,
}

impl Ui {
    pub fn new() -> Self {
        Self {
            picker: Picker::from_query_stdio().ok(),
            image_version: 0,
            image_state: None,
        }
    }

    /// Drop the page image when the viewer is hidden. It's rebuilt from the
    /// viewer's image when it's shown again.
    pub fn screen_changed(&mut self, screen: ScreenName) {
        if screen != ScreenName::Illust {
            self.image_version = 0;
            self.image_state = None;
        }
    }

    /// Rebuild the image protocol if the viewer's image changed.
    fn sync_image(&mut self, illust: &IllustScreen) {
        let Some((version, image)) = illust.image_if_newer(self.image_version) else {
            return;
        };
        self.image_version = version;
        self.image_state = match (image, &self.picker) {
            (Some(image), Some(picker)) => Some(picker.new_resize_protocol(image)),
            _ => None,
        };
    }

    pub fn draw(
        &mut self,
        f: &mut Frame,
        screen: Option<ScreenName>,
        search: &SearchScreen,
        illust: &IllustScreen,
        status: &StatusBar,
    ) {
        let Some(screen) = screen else {
            draw_loading_screen(f, "Connecting to MangaDex...");
            return;
        };

        let root = Layout::default()
            .direction(Direction::Vertical)
            .constraints([
                Constraint::Length(3), // header/tabs
                Constraint::Min(10),   // content
                Constraint::Length(3), // footer
            ])
            .split(f.area());

        draw_header(f, root[0], screen);
        match screen {
            ScreenName::Search => draw_listing(f, root[1], &search.view()),
            ScreenName::Illust => {
                self.sync_image(illust);
                self.draw_viewer(f, root[1], illust);
            }
        }
        draw_footer(f, root[2], screen, status);
    }

    fn draw_viewer(&mut self, f: &mut Frame, area: Rect, illust: &IllustScreen) {
        let view = illust.view();
        let block = Block::default()
            .borders(Borders::ALL)
            .title(truncate_text(&view.title, area.width.saturating_sub(4) as usize))
            .border_style(Style::default().fg(Color::Cyan));
        let inner = block.inner(area);
        f.render_widget(block, area);

        let layout = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(1), Constraint::Length(1)])
            .split(inner);

        let placeholder = if view.muted {
            Some(Span::styled("Muted", Style::default().fg(Color::Red)))
        } else if let Some(error) = &view.error {
            Some(Span::styled(error.clone(), Style::default().fg(Color::Red)))
        } else if view.loading && self.image_state.is_none() {
            Some(Span::styled(
                format!("{} Loading...", spinner()),
                Style::default().fg(Color::DarkGray),
            ))
        } else if self.picker.is_none() {
            Some(Span::styled(
                "This terminal can't show images",
                Style::default().fg(Color::DarkGray),
            ))
        } else {
            None
        };

        match (placeholder, self.image_state.as_mut()) {
            (None, Some(state)) => {
                let image_widget = StatefulImage::new().resize(Resize::Scale(None));
                f.render_stateful_widget(image_widget, layout[0], state);
            }
            (placeholder, _) => {
                let area = centered_line(layout[0]);
                let text = placeholder.unwrap_or_else(|| Span::raw(""));
                f.render_widget(Paragraph::new(Line::from(text)).alignment(Alignment::Center), area);
            }
        }

        let mut info = vec![
            Span::styled("Page ", Style::default().fg(Color::DarkGray)),
            Span::styled(
                format!("{}/{}", view.page + 1, view.page_count.max(1)),
                Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD),
            ),
        ];
        if !view.user_name.is_empty() {
            info.push(Span::styled("  ★ ", Style::default().fg(Color::Yellow)));
            info.push(Span::styled(view.user_name, Style::default().fg(Color::Cyan)));
        }
        f.render_widget(Paragraph::new(Line::from(info)), layout[1]);
    }
}

impl Default for Ui {
    fn default() -> Self {
        Self::new()
    }
}

fn spinner() -> &'static str {
    let spinner_frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
    let millis = std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default();
    spinner_frames[(millis / 100) as usize % spinner_frames.len()]
}

fn centered_line(area: Rect) -> Rect {
    Rect::new(area.x, area.y + area.height / 2, area.width, 1.min(area.height))
}

fn draw_loading_screen(f: &mut Frame, message: &str) {
    let area = f.area();

    let block = Block::default()
        .borders(Borders::ALL)
        .title(TITLE)
        .border_style(Style::default().fg(Color::Cyan));

    let inner = block.inner(area);
    f.render_widget(block, area);

    let center_layout = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Percentage(40),
            Constraint::Length(3),
            Constraint::Length(2),
            Constraint::Percentage(40),
        ])
        .split(inner);

    let loading_text = Line::from(vec![
        Span::styled(
            format!(" {} ", spinner()),
            Style::default().fg(Color::Cyan).add_modifier(Modifier::BOLD),
        ),
        Span::styled(
            "Loading...",
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD),
        ),
    ]);
    f.render_widget(
        Paragraph::new(loading_text).alignment(Alignment::Center),
        center_layout[1],
    );

    let message = Paragraph::new(message)
        .style(Style::default().fg(Color::DarkGray))
        .alignment(Alignment::Center);
    f.render_widget(message, center_layout[2]);
}

fn draw_header(f: &mut Frame, area: Rect, screen: ScreenName) {
    let titles = vec!["Listing", "Viewer"];
    let selected = match screen {
        ScreenName::Search => 0,
        ScreenName::Illust => 1,
    };

    let tabs = Tabs::new(titles)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(TITLE)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .select(selected)
        .style(Style::default().fg(Color::DarkGray))
        .highlight_style(Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD));

    f.render_widget(tabs, area);
}

fn draw_listing(f: &mut Frame, area: Rect, view: &SearchView) {
    let block = Block::default()
        .borders(Borders::ALL)
        .title(view.title.as_str())
        .border_style(Style::default().fg(Color::White));
    let mut inner = block.inner(area);
    f.render_widget(block, area);

    if let Some(prompt) = &view.prompt {
        let line = Line::from(vec![
            Span::styled("Search: ", Style::default().fg(Color::Yellow)),
            Span::raw(prompt.as_str()),
            Span::styled("▏", Style::default().fg(Color::Yellow)),
        ]);
        f.render_widget(Paragraph::new(line), Rect::new(inner.x, inner.y, inner.width, 1));
        inner.y += 2.min(inner.height);
        inner.height = inner.height.saturating_sub(2);
    }

    if view.entries.is_empty() {
        let text = if let Some(error) = &view.error {
            Span::styled(error.as_str(), Style::default().fg(Color::Red))
        } else if view.loading {
            Span::styled(
                format!("{} Loading...", spinner()),
                Style::default().fg(Color::DarkGray),
            )
        } else {
            Span::styled("Nothing here", Style::default().fg(Color::DarkGray))
        };
        f.render_widget(
            Paragraph::new(Line::from(text)).alignment(Alignment::Center),
            centered_line(inner),
        );
        return;
    }

    // Each entry takes two lines. Scroll so the selection stays visible.
    let rows = (inner.height / 2).max(1) as usize;
    let first = view.selected.saturating_sub(rows - 1);
    let width = inner.width.saturating_sub(2) as usize;

    let mut lines = Vec::new();
    for (idx, entry) in view.entries.iter().enumerate().skip(first).take(rows) {
        let selected = idx == view.selected;
        let marker = if selected { "▶ " } else { "  " };
        let title_style = if selected {
            Style::default().fg(Color::Yellow).add_modifier(Modifier::BOLD)
        } else {
            Style::default().fg(Color::White).add_modifier(Modifier::BOLD)
        };
        lines.push(Line::from(vec![
            Span::styled(marker, Style::default().fg(Color::Yellow)),
            Span::styled(truncate_text(&entry.title, width), title_style),
        ]));
        lines.push(Line::from(vec![
            Span::raw("  "),
            Span::styled(
                truncate_text(&entry.subtitle, width),
                Style::default().fg(Color::DarkGray),
            ),
        ]));
    }
    f.render_widget(Paragraph::new(lines), inner);
}

fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() <= max_len {
        text.to_string()
    } else {
        format!(
            "{}...",
            text.chars()
                .take(max_len.saturating_sub(3))
                .collect::<String>()
        )
    }
}

fn keybinds(screen: ScreenName) -> &'static [(&'static str, &'static str)] {
    match screen {
        ScreenName::Search => &[
            ("↑/↓", "select"),
            ("Enter", "open"),
            ("/", "search"),
            ("1/2", "popular/recent"),
            ("r", "refresh"),
            ("Esc", "back"),
            ("q", "quit"),
        ],
        ScreenName::Illust => &[
            ("←/→", "page"),
            ("n/p", "chapter"),
            ("s/L", "slideshow"),
            ("m", "mute"),
            ("o", "browser"),
            ("Esc", "back"),
            ("q", "quit"),
        ],
    }
}

fn draw_footer(f: &mut Frame, area: Rect, screen: ScreenName, status: &StatusBar) {
    let (location, message) = status.text();

    let line = match message {
        Some(message) => Line::from(vec![
            Span::styled("! ", Style::default().fg(Color::Red).add_modifier(Modifier::BOLD)),
            Span::styled(message, Style::default().fg(Color::Red)),
        ]),
        None => {
            let mut spans = Vec::new();
            for (key, action) in keybinds(screen) {
                spans.push(Span::styled(*key, Style::default().fg(Color::Yellow)));
                spans.push(Span::raw(format!(": {action}  ")));
            }
            Line::from(spans)
        }
    };

    let p = Paragraph::new(line)
        .block(
            Block::default()
                .borders(Borders::ALL)
                .title(location)
                .border_style(Style::default().fg(Color::Cyan)),
        )
        .alignment(Alignment::Center);
    f.render_widget(p, area);
}
