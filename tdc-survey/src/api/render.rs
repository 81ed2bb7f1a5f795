//! Server-side HTML for the four survey pages
//!
//! Plain HTML forms, no scripts. Every form posts back and the server
//! redirects to `/`, which renders whatever page the session is on.

use chrono::{DateTime, Utc};
use std::fmt::Write;
use tdc_common::time::elapsed_minutes;

use crate::design::{ChoiceTask, DoorAttributes, Side, TransferHistory};
use crate::flow::{
    DemographicsForm, AGE_OPTIONS, FREQUENCY_OPTIONS, GENDER_OPTIONS, MOBILITY_OPTIONS,
};
use crate::session::{Choice, Session, TRAVEL_CONTEXTS};

/// Inline message shown above a form
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Notice {
    Success(String),
    Error(String),
}

const STYLE: &str = r#"
        body {
            font-family: system-ui, -apple-system, sans-serif;
            max-width: 960px;
            margin: 40px auto;
            padding: 0 20px;
            line-height: 1.6;
            color: #222;
        }
        h1 {
            border-bottom: 2px solid #0066cc;
            padding-bottom: 10px;
        }
        .notice { padding: 12px 16px; border-radius: 4px; margin: 16px 0; }
        .notice.success { background: #e6f4ea; border: 1px solid #34a853; }
        .notice.error { background: #fdecea; border: 1px solid #d93025; }
        .banner { background: #fdecea; border: 2px solid #d93025; padding: 20px; border-radius: 4px; }
        .attributes { display: grid; grid-template-columns: 2.5fr 4fr; gap: 6px 16px; }
        .doors { display: grid; grid-template-columns: 1fr 1fr; gap: 24px; }
        .door img { width: 100%; border: 1px solid #ccc; }
        fieldset { border: 1px solid #ddd; border-radius: 4px; margin: 12px 0; }
        label { display: block; }
        select, textarea { width: 100%; max-width: 480px; }
        button {
            padding: 10px 20px;
            background: #0066cc;
            color: white;
            border: none;
            border-radius: 4px;
            margin: 10px 5px 10px 0;
            cursor: pointer;
        }
        button.secondary { background: #777; }
"#;

const ATTRIBUTE_LIST: [(&str, &str); 12] = [
    ("Walking distance to the door (D2D)", "How far you'd walk on the platform to reach it (in meters)."),
    ("Distance to station exit (D2E)", "How far you'll walk after arriving at your destination (in meters)."),
    ("Obstacle (O)", "Whether there is a physical obstacle between you and the door."),
    ("People waiting (CD)", "The number of people already lined up outside the door."),
    ("Crowding on platform (CP)", "How crowded the platform is near the door (people per square meter)."),
    ("Crowdedness on screen (CTD)", "Crowdedness info on display screen. Options: Green = low crowd, Yellow = medium crowd, Red = high crowd."),
    ("LED stripe indicator (CTL)", "Crowdedness info via LED ground stripes. Options: Green = low crowd, Yellow = medium crowd, Red = high crowd."),
    ("Discount offered (D)", "The fare discount percentage you'd receive for using this door."),
    ("Train arrives in (T2DR)", "Number of minutes until this train arrives."),
    ("Next train in (T2DS)", "If you skip this train, how long until the next one (in minutes)."),
    ("Trip shift indicator (TS)", "Current train or a later train (e.g., delay or alternate option)."),
    ("Transfer history (TR)", "No transfer, transferred and changed doors, or transferred and kept the same door."),
];

/// Escape text for HTML element content and quoted attribute values
pub fn escape(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    for c in text.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&#39;"),
            _ => out.push(c),
        }
    }
    out
}

fn shell(title: &str, body: &str) -> String {
    format!(
        r#"<!DOCTYPE html>
<html lang="en">
<head>
    <meta charset="UTF-8">
    <meta name="viewport" content="width=device-width, initial-scale=1.0">
    <title>{title}</title>
    <style>{style}</style>
</head>
<body>
<h1>{title}</h1>
{body}
</body>
</html>
"#,
        title = escape(title),
        style = STYLE,
        body = body,
    )
}

fn notice_html(notice: Option<&Notice>) -> String {
    match notice {
        Some(Notice::Success(text)) => {
            format!(r#"<div class="notice success">{}</div>"#, escape(text))
        }
        Some(Notice::Error(text)) => format!(r#"<div class="notice error" role="alert">{}</div>"#, escape(text)),
        None => String::new(),
    }
}

fn radio_group(name: &str, options: &[String], selected: Option<&str>) -> String {
    let mut html = String::new();
    for option in options {
        let checked = if selected == Some(option.as_str()) { " checked" } else { "" };
        let _ = writeln!(
            html,
            r#"<label><input type="radio" name="{name}" value="{value}"{checked}> {value}</label>"#,
            name = name,
            value = escape(option),
            checked = checked,
        );
    }
    html
}

fn select(name: &str, label: &str, options: &[&str], selected: &str) -> String {
    let mut html = format!(
        r#"<label for="{name}">{label}</label>
<select id="{name}" name="{name}">
"#,
        name = name,
        label = label,
    );
    for option in options {
        let sel = if *option == selected { " selected" } else { "" };
        let _ = writeln!(
            html,
            r#"<option value="{value}"{sel}>{value}</option>"#,
            value = escape(option),
            sel = sel,
        );
    }
    html.push_str("</select>\n");
    html
}

/// Comprehension check answers offered for the ticket price
pub fn price_options(ticket_price: f64) -> Vec<String> {
    [-2.0, -1.0, 0.0, 1.0]
        .iter()
        .map(|delta| format!("€{:.2}", ticket_price + delta))
        .collect()
}

/// Comprehension check answers offered for the trip duration
pub fn duration_options(trip_duration: u32) -> Vec<String> {
    ["10".to_string(), "20".to_string(), "30".to_string(), trip_duration.to_string()]
        .iter()
        .map(|minutes| format!("{} minutes", minutes))
        .collect()
}

pub fn start_page(session: &Session, questions: usize, notice: Option<&Notice>) -> String {
    let mut body = String::from(
        r#"<p>Dear Participant,</p>
<p>Thank you for your interest in this study!</p>
<p>In this survey, we explore how passengers choose between different subway doors when boarding a train.</p>
<hr>
<p>Please read the following information carefully before starting the survey.</p>
<p><strong>Set-up:</strong></p>
<p>Imagine you are standing on a subway platform, about to decide where to wait for an arriving train.
You haven't positioned yourself yet and must now choose a spot on the platform.</p>
<hr>
<p><strong>How it works</strong></p>
<ul>
"#,
    );
    let _ = writeln!(
        body,
        "<li>You'll see {} decision tasks, each showing 2 subway doors (A, B).</li>",
        questions
    );
    body.push_str(
        r#"<li>For each task, compare the doors and select the one you'd choose to board from.</li>
<li>All doors are part of the same train, arriving now.</li>
<li>Make your decision as if you're on the platform in real life.</li>
</ul>
<h2>Attributes You'll See</h2>
<div class="attributes">
"#,
    );
    for (attribute, explanation) in ATTRIBUTE_LIST {
        let _ = writeln!(body, "<strong>{}</strong><span>{}</span>", attribute, explanation);
    }
    body.push_str("</div>\n");

    let _ = write!(
        body,
        r#"<hr>
<p><strong>Other Information:</strong></p>
<ul>
<li>Ticket price: Your regular ticket costs <strong>{price} Euros</strong>. This remains constant.</li>
<li>Trip duration: Your trip takes <strong>{duration} minutes</strong>.</li>
<li>You are traveling in this experiment: <strong>{context}</strong></li>
</ul>
<p>Respond naturally. There's no "right" answer.</p>
<p>Your choices help us understand what matters to passengers.</p>
<hr>
<p><strong>Demographic Information:</strong></p>
<p>At the end, we'll ask some optional background questions (e.g., age, gender, travel frequency).</p>
<p><strong>Data Protection and Confidentiality:</strong></p>
<ul>
<li>Participation is voluntary, you can withdraw anytime.</li>
<li>Data is anonymous and for academic research only.</li>
<li>We comply with GDPR/DSGVO.</li>
</ul>
<hr>
<p>By continuing, you confirm that you have read and understood the information and agree to participate.</p>
<h2>Quick Check Before Starting</h2>
<p>Please answer these short questions to proceed:</p>
"#,
        price = session.ticket_price,
        duration = session.trip_duration,
        context = escape(session.travel_context),
    );

    let previous = session.comprehension.as_ref();
    let contexts: Vec<String> = TRAVEL_CONTEXTS.iter().map(|c| c.to_string()).collect();
    let _ = write!(
        body,
        r#"<form method="post" action="/start/confirm">
<fieldset><legend>1. What is the regular ticket price for your trip in this experiment?</legend>
{price}</fieldset>
<fieldset><legend>2. How long is your trip from origin to destination?</legend>
{duration}</fieldset>
<fieldset><legend>3. How are you traveling in this experiment?</legend>
{context}</fieldset>
<button type="submit">Confirm Answers</button>
</form>
"#,
        price = radio_group(
            "price",
            &price_options(session.ticket_price),
            previous.map(|a| a.price.as_str())
        ),
        duration = radio_group(
            "duration",
            &duration_options(session.trip_duration),
            previous.map(|a| a.duration.as_str())
        ),
        context = radio_group("context", &contexts, previous.map(|a| a.context.as_str())),
    );

    body.push_str(&notice_html(notice));
    if session.allow_start {
        if notice.is_none() {
            body.push_str(&notice_html(Some(&Notice::Success(
                "Correct. You may now proceed to the survey.".to_string(),
            ))));
        }
        body.push_str(
            r#"<form method="post" action="/start/begin"><button type="submit">Start Survey</button></form>
"#,
        );
    }

    shell("Welcome to the Train Door Choice Experiment", &body)
}

fn door_html(side: Side, door: &DoorAttributes, ticket_price: f64) -> String {
    let mut html = format!(
        r#"<div class="door">
<h2>Door {side}</h2>
<img src="/door-images/{d2d}" alt="Option {side}">
<ul>
<li><strong>Walking distance (D2D)</strong>: {d2d} m</li>
<li><strong>Distance to exit (D2E)</strong>: {d2e} m</li>
<li><strong>Obstacle (O)</strong>: {obstacle}</li>
<li><strong>People waiting (CD)</strong>: {cd} people</li>
<li><strong>Crowding on platform (CP)</strong>: {cp} people/m²</li>
<li><strong>Discount offered (D)</strong>: {discount}% → you pay €{pay:.2}</li>
<li><strong>Train arrives in (T2DR)</strong>: {t2dr} min</li>
"#,
        side = side,
        d2d = door.walk_distance,
        d2e = door.exit_distance,
        obstacle = if door.obstacle { "Yes" } else { "No" },
        cd = door.queue_length,
        cp = door.platform_crowding,
        discount = door.discount_pct,
        pay = door.discounted_price(ticket_price),
        t2dr = door.arrival_minutes,
    );

    if door.shows_trip_shift() {
        let _ = write!(
            html,
            "<li><strong>Next train in (T2DS)</strong>: {} min</li>\n<li><strong>Trip shift (TS)</strong>: {}</li>\n",
            door.next_train_minutes, door.trip_shift
        );
    }
    match door.transfer_history() {
        TransferHistory::DoorChange => html.push_str(
            "<li><strong>Transfer history (TR)</strong>: There was a door change in the previous trip.</li>\n",
        ),
        TransferHistory::NoChange => html.push_str(
            "<li><strong>Transfer history (TR)</strong>: There was no door change in the previous trip.</li>\n",
        ),
        TransferHistory::None => {}
    }
    html.push_str("</ul>\n</div>\n");
    html
}

pub fn survey_page(session: &Session, task: &ChoiceTask, total: usize, notice: Option<&Notice>) -> String {
    let idx = task.index;
    let mut body = format!(
        r#"<p>Imagine you are traveling {context}.</p>
<p>Remember: The regular ticket price for this trip is <strong>{price} Euros</strong>.
Each door option may offer a discount that will reduce this price.</p>
<p>Remember: The total travel time for your trip is <strong>{duration} minutes</strong>.</p>
<h2>Question {number} of {total}: Which door do you choose?</h2>
"#,
        context = escape(&session.travel_context.to_lowercase()),
        price = session.ticket_price,
        duration = session.trip_duration,
        number = idx + 1,
        total = total,
    );

    body.push_str(&notice_html(notice));
    body.push_str("<div class=\"doors\">\n");
    for side in Side::BOTH {
        body.push_str(&door_html(side, task.door(side), session.ticket_price));
    }
    body.push_str("</div>\n");

    let labels: Vec<String> = Choice::ALL.iter().map(|c| c.label().to_string()).collect();
    let next_label = if idx + 1 < total { "Next" } else { "Submit Survey" };
    let _ = write!(
        body,
        r#"<form method="post" action="/survey">
<fieldset><legend>Which option do you choose?</legend>
{choices}</fieldset>
<button type="submit" name="action" value="back" class="secondary">Back</button>
<button type="submit" name="action" value="next">{next}</button>
</form>
"#,
        choices = radio_group("choice", &labels, Some(session.displayed_choice(idx).label())),
        next = next_label,
    );

    shell("Train Door Choice Survey", &body)
}

pub fn demographics_page(form: &DemographicsForm, notice: Option<&Notice>) -> String {
    let mut body = String::from(
        r#"<p>To better understand the survey results, we would like to ask you a few additional questions.
Your answers are completely voluntary, anonymous, and will only be used for academic research purposes.</p>
"#,
    );
    body.push_str(&notice_html(notice));
    body.push_str("<form method=\"post\" action=\"/demographics\">\n");
    body.push_str(&select("age", "What is your age group?", &AGE_OPTIONS, &form.age));
    body.push_str(&select("gender", "What is your gender?", &GENDER_OPTIONS, &form.gender));
    body.push_str(&select(
        "travel_frequency",
        "How often have you approximately traveled by train in the last 12 months?",
        &FREQUENCY_OPTIONS,
        &form.travel_frequency,
    ));
    body.push_str(&select(
        "ubahn_frequency",
        "How often have you approximately traveled by <em>subway</em> in the last 12 months?",
        &FREQUENCY_OPTIONS,
        &form.ubahn_frequency,
    ));
    body.push_str(&select(
        "mobility",
        "How would you assess your mobility?",
        &MOBILITY_OPTIONS,
        &form.mobility,
    ));
    let _ = write!(
        body,
        r#"<label for="comment">Do you have any comments, suggestions, or feedback about the survey experience?</label>
<textarea id="comment" name="comment" rows="4" placeholder="(Optional) You can write here...">{}</textarea>
<button type="submit">Submit Demographic Data</button>
</form>
"#,
        escape(&form.comment)
    );

    shell("A Few More Questions", &body)
}

pub fn end_page(session: &Session, now: DateTime<Utc>) -> String {
    let finished = session.ended_at.unwrap_or(now);
    let body = format!(
        r#"<p>You completed the survey in <strong>{} minutes</strong>.</p>
<p>Your responses have been recorded successfully.</p>
<p>If you have any questions or would like to know more about this research, please contact the study team.</p>
<hr>
<p>You may now close this tab or window.</p>
"#,
        elapsed_minutes(session.started_at, finished)
    );
    shell("Thank You for Your Participation!", &body)
}

/// Shown when the browser came back from the cookie redirect without the cookie
pub fn cookies_required_page() -> String {
    let body = r#"<div class="banner" role="alert">
<p><strong>Cookies are disabled.</strong> This survey keeps your progress in a session cookie.</p>
</div>
<p>Please allow cookies for this site, then <a href="/">start the survey</a>.</p>
"#;
    shell("Cookies Required", body)
}

/// Blocking banner page for errors the participant cannot fix inline
pub fn error_page(title: &str, message: &str) -> String {
    let body = format!(
        r#"<div class="banner" role="alert">
<p><strong>Error:</strong> {}</p>
</div>
<p><a href="/">Return to the survey</a></p>
"#,
        escape(message)
    );
    shell(title, &body)
}
