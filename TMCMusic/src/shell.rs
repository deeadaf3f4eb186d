//! Shell de commandes ligne à ligne.
//!
//! Les commandes qui interrogent le catalogue partent en tâche de fond ;
//! leurs résultats sont affichés depuis le thread de la tâche, quand ils
//! arrivent. La dernière liste de pistes affichée sert de référence aux
//! commandes numérotées (`play 3`, `enqueue 2`, ...).

use std::io::{self, BufRead, Write};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use anyhow::{Context, Result, anyhow, bail};
use tmcconfig::Config;
use tmccontrol::{PlaybackStatus, SeekTarget, Session};
use tmcsource::views::regular_albums;
use tmcsource::{AlbumKind, CatalogError, Credentials, Playlist, Rating, StationRef, TrackRef};
use tracing::debug;

const HELP: &str = "\
Catalogue :
  login [user password]   connexion (identifiants de la configuration par défaut)
  tracks                  pistes de la bibliothèque
  playlists               playlists (Liked Songs en tête)
  playlist <n>            pistes de la playlist n
  stations                stations
  station <n>             pistes de la station n
  radio <n>               crée une station à partir de la piste n
  artists                 artistes
  liked                   pistes notées « pouce levé »
  library                 albums de la bibliothèque
  search <texte>          recherche dans le catalogue
  rate <n> up|down|none   note la piste n
  add <n> / forget <n>    ajoute / retire la piste n de la bibliothèque
  refresh                 vide les caches
Lecture :
  queue                   file de lecture
  enqueue <n> / dequeue <n>
  play [n]                joue la piste n de la dernière liste, ou reprend
  next / prev / pause / stop
  seek <±pct>             +10 avance de 10 %, 40 va à 40 %
  volume <0-100>
  shuffle / repeat        bascule aléatoire / répétition d'une piste
  eq [bande gain]         égaliseur
  status
  quit";

#[derive(Debug, Clone, PartialEq)]
enum Command {
    Empty,
    Help,
    Login(Option<(String, String)>),
    Tracks,
    Playlists,
    Playlist(usize),
    Stations,
    Station(usize),
    Radio(usize),
    Artists,
    Liked,
    Library,
    Search(String),
    Rate(usize, Rating),
    Add(usize),
    Forget(usize),
    Refresh,
    Queue,
    Enqueue(usize),
    Dequeue(usize),
    Play(Option<usize>),
    Next,
    Prev,
    Pause,
    Stop,
    Seek(SeekTarget),
    Volume(u8),
    Shuffle,
    Repeat,
    Equalizer(Option<(usize, f32)>),
    Status,
    Quit,
}

impl Command {
    fn parse(line: &str) -> Result<Self> {
        let line = line.trim();
        let (name, rest) = match line.split_once(char::is_whitespace) {
            Some((name, rest)) => (name, rest.trim()),
            None => (line, ""),
        };
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match name.to_lowercase().as_str() {
            "" => Command::Empty,
            "help" | "?" => Command::Help,
            "login" => match args.as_slice() {
                [] => Command::Login(None),
                [user, password] => Command::Login(Some((user.to_string(), password.to_string()))),
                _ => bail!("usage : login [user password]"),
            },
            "tracks" => Command::Tracks,
            "playlists" => Command::Playlists,
            "playlist" => Command::Playlist(index(&args)?),
            "stations" => Command::Stations,
            "station" => Command::Station(index(&args)?),
            "radio" => Command::Radio(index(&args)?),
            "artists" => Command::Artists,
            "liked" => Command::Liked,
            "library" => Command::Library,
            "search" => {
                if rest.is_empty() {
                    bail!("usage : search <texte>");
                }
                Command::Search(rest.to_string())
            }
            "rate" => match args.as_slice() {
                [n, rating] => Command::Rate(parse_index(n)?, parse_rating(rating)?),
                _ => bail!("usage : rate <n> up|down|none"),
            },
            "add" => Command::Add(index(&args)?),
            "forget" => Command::Forget(index(&args)?),
            "refresh" => Command::Refresh,
            "queue" => Command::Queue,
            "enqueue" => Command::Enqueue(index(&args)?),
            "dequeue" => Command::Dequeue(index(&args)?),
            "play" => match args.as_slice() {
                [] => Command::Play(None),
                [n] => Command::Play(Some(parse_index(n)?)),
                _ => bail!("usage : play [n]"),
            },
            "next" => Command::Next,
            "prev" => Command::Prev,
            "pause" => Command::Pause,
            "stop" => Command::Stop,
            "seek" => match args.as_slice() {
                [value] => Command::Seek(parse_seek(value)?),
                _ => bail!("usage : seek <±pct>"),
            },
            "volume" => match args.as_slice() {
                [value] => {
                    let volume: u8 = value
                        .parse()
                        .with_context(|| format!("volume invalide : {value}"))?;
                    if volume > 100 {
                        bail!("le volume va de 0 à 100");
                    }
                    Command::Volume(volume)
                }
                _ => bail!("usage : volume <0-100>"),
            },
            "shuffle" => Command::Shuffle,
            "repeat" => Command::Repeat,
            "eq" => match args.as_slice() {
                [] => Command::Equalizer(None),
                [band, amp] => {
                    let band: usize = band
                        .parse()
                        .with_context(|| format!("bande invalide : {band}"))?;
                    let amp: f32 = amp
                        .parse()
                        .with_context(|| format!("gain invalide : {amp}"))?;
                    Command::Equalizer(Some((band, amp)))
                }
                _ => bail!("usage : eq [bande gain]"),
            },
            "status" => Command::Status,
            "quit" | "exit" | "q" => Command::Quit,
            other => bail!("commande inconnue : {other} (tape `help`)"),
        };
        Ok(command)
    }
}

fn index(args: &[&str]) -> Result<usize> {
    match args {
        [n] => parse_index(n),
        _ => bail!("un numéro est attendu"),
    }
}

/// Numéro affiché (à partir de 1) vers index (à partir de 0).
fn parse_index(value: &str) -> Result<usize> {
    let n: usize = value
        .parse()
        .with_context(|| format!("numéro invalide : {value}"))?;
    n.checked_sub(1)
        .ok_or_else(|| anyhow!("les numéros commencent à 1"))
}

fn parse_rating(value: &str) -> Result<Rating> {
    match value.to_lowercase().as_str() {
        "up" | "+" => Ok(Rating::ThumbsUp),
        "down" | "-" => Ok(Rating::ThumbsDown),
        "none" | "0" => Ok(Rating::None),
        other => bail!("note invalide : {other} (up, down ou none)"),
    }
}

/// `+10` / `-10` : déplacement relatif en pourcents ; `40` : position absolue.
fn parse_seek(value: &str) -> Result<SeekTarget> {
    let relative = value.starts_with('+') || value.starts_with('-');
    let percent: f32 = value
        .trim_end_matches('%')
        .parse()
        .with_context(|| format!("position invalide : {value}"))?;
    let fraction = percent / 100.0;
    Ok(if relative {
        SeekTarget::Relative(fraction)
    } else {
        SeekTarget::Absolute(fraction.clamp(0.0, 1.0))
    })
}

/// Dernières listes affichées, mises à jour depuis les callbacks.
#[derive(Default)]
struct Listing {
    tracks: Vec<TrackRef>,
    playlists: Vec<Playlist>,
    stations: Vec<StationRef>,
}

type SharedListing = Arc<Mutex<Listing>>;

fn lock(listing: &SharedListing) -> MutexGuard<'_, Listing> {
    listing.lock().unwrap_or_else(PoisonError::into_inner)
}

fn print_tracks(tracks: &[TrackRef]) {
    if tracks.is_empty() {
        println!("  (aucune piste)");
    }
    for (i, track) in tracks.iter().enumerate() {
        println!("{:>4}. {} ({})", i + 1, track, track.duration_label());
    }
}

fn report(context: &str, err: CatalogError) {
    if err.is_auth_error() {
        eprintln!("{context} : non connecté (tape `login`)");
    } else {
        eprintln!("{context} : {err}");
    }
}

pub struct Shell<'a> {
    session: &'a Session,
    config: &'a Config,
    listing: SharedListing,
}

impl<'a> Shell<'a> {
    pub fn new(session: &'a Session, config: &'a Config) -> Self {
        let events = session.coordinator().events();
        events.track_changed.subscribe(|track| println!("▶ {track}"));
        events
            .playback_error
            .subscribe(|failure| eprintln!("Lecture impossible de {} : {}", failure.track, failure.message));
        events.playback_flags_changed.subscribe(|flags| {
            println!(
                "aléatoire : {}, répétition : {}",
                on_off(flags.shuffle),
                on_off(flags.repeat_one)
            )
        });
        session
            .cache()
            .events()
            .auth_state_changed
            .subscribe(|authenticated| {
                if *authenticated {
                    println!("Connecté.");
                } else {
                    println!("Non connecté.");
                }
            });

        Self {
            session,
            config,
            listing: SharedListing::default(),
        }
    }

    /// Se connecte avec les identifiants de la configuration, s'il y en a.
    pub fn auto_login(&self) {
        match self.config_credentials() {
            Ok(Some(credentials)) => {
                if let Err(err) = self.login(credentials) {
                    eprintln!("Connexion impossible : {err:#}");
                }
            }
            Ok(None) => println!("Pas d'identifiants configurés : `login <user> <password>`."),
            Err(err) => eprintln!("Identifiants illisibles : {err:#}"),
        }
    }

    pub fn run(&self, input: impl BufRead) -> Result<()> {
        prompt();
        for line in input.lines() {
            let line = line?;
            match Command::parse(&line).and_then(|command| self.execute(command)) {
                Ok(true) => {}
                Ok(false) => return Ok(()),
                Err(err) => eprintln!("Erreur : {err:#}"),
            }
            prompt();
        }
        Ok(())
    }

    fn config_credentials(&self) -> Result<Option<Credentials>> {
        let username = self.config.get_catalog_username()?;
        if username.is_empty() {
            return Ok(None);
        }
        let password = self.config.get_catalog_password()?;
        Ok(Some(Credentials::new(username, password)))
    }

    fn login(&self, credentials: Credentials) -> Result<()> {
        self.session.cache().login_async(credentials, |result| match result {
            Ok(true) => {}
            Ok(false) => eprintln!("Identifiants refusés."),
            Err(err) => report("Connexion", err),
        })?;
        Ok(())
    }

    fn track_at(&self, index: usize) -> Result<TrackRef> {
        lock(&self.listing)
            .tracks
            .get(index)
            .cloned()
            .ok_or_else(|| anyhow!("piste {} absente de la dernière liste", index + 1))
    }

    /// Exécute une commande ; `false` demande la sortie du shell.
    fn execute(&self, command: Command) -> Result<bool> {
        debug!(command = ?command, "Shell command");
        let cache = self.session.cache();
        let player = self.session.coordinator();

        match command {
            Command::Empty => {}
            Command::Help => println!("{HELP}"),
            Command::Login(explicit) => {
                let credentials = match explicit {
                    Some((username, password)) => {
                        self.config.set_catalog_username(username.clone())?;
                        self.config.set_catalog_password(&password)?;
                        Credentials::new(username, password)
                    }
                    None => self
                        .config_credentials()?
                        .ok_or_else(|| anyhow!("aucun identifiant configuré"))?,
                };
                self.login(credentials)?;
            }
            Command::Tracks => {
                let listing = Arc::clone(&self.listing);
                cache.get_all_tracks_async(move |result| match result {
                    Ok(tracks) => {
                        print_tracks(&tracks);
                        lock(&listing).tracks = tracks;
                    }
                    Err(err) => report("Pistes", err),
                })?;
            }
            Command::Playlists => {
                let listing = Arc::clone(&self.listing);
                cache.get_all_playlists_async(move |result| match result {
                    Ok(playlists) => {
                        for (i, playlist) in playlists.iter().enumerate() {
                            println!("{:>4}. {} ({} pistes)", i + 1, playlist.name, playlist.tracks.len());
                        }
                        lock(&listing).playlists = playlists;
                    }
                    Err(err) => report("Playlists", err),
                })?;
            }
            Command::Playlist(index) => {
                let mut listing = lock(&self.listing);
                let playlist = listing
                    .playlists
                    .get(index)
                    .cloned()
                    .ok_or_else(|| anyhow!("playlist {} inconnue (tape `playlists`)", index + 1))?;
                println!("{} :", playlist.name);
                print_tracks(&playlist.tracks);
                listing.tracks = playlist.tracks;
            }
            Command::Stations => {
                let listing = Arc::clone(&self.listing);
                cache.get_all_stations_async(move |result| match result {
                    Ok(stations) => {
                        for (i, station) in stations.iter().enumerate() {
                            println!("{:>4}. {}", i + 1, station.name);
                        }
                        lock(&listing).stations = stations;
                    }
                    Err(err) => report("Stations", err),
                })?;
            }
            Command::Station(index) => {
                let station = lock(&self.listing)
                    .stations
                    .get(index)
                    .cloned()
                    .ok_or_else(|| anyhow!("station {} inconnue (tape `stations`)", index + 1))?;
                let listing = Arc::clone(&self.listing);
                cache.load_station_tracks_async(station, move |result| match result {
                    Ok(tracks) => {
                        print_tracks(&tracks);
                        lock(&listing).tracks = tracks;
                    }
                    Err(err) => report("Station", err),
                })?;
            }
            Command::Radio(index) => {
                let seed = self.track_at(index)?;
                cache.create_station_async(seed, |result| match result {
                    Ok(station) => println!("Station créée : {}", station.name),
                    Err(err) => report("Création de station", err),
                })?;
            }
            Command::Artists => {
                cache.get_artists_async(|result| match result {
                    Ok(artists) => {
                        for artist in &artists {
                            let albums = artist
                                .albums
                                .iter()
                                .filter(|album| album.kind == AlbumKind::Regular)
                                .count();
                            println!(
                                "  {} ({} albums, {} pistes)",
                                artist.name,
                                albums,
                                artist.track_count()
                            );
                        }
                    }
                    Err(err) => report("Artistes", err),
                })?;
            }
            Command::Liked => {
                let liked = cache.liked_songs();
                print_tracks(&liked.tracks);
                lock(&self.listing).tracks = liked.tracks;
            }
            Command::Library => {
                let albums = regular_albums(&cache.artists());
                if albums.is_empty() {
                    println!("  (aucun album en cache, tape `tracks`)");
                }
                for album in albums {
                    println!("  {} - {} ({} pistes)", album.artist, album.name, album.tracks.len());
                }
            }
            Command::Search(query) => {
                let listing = Arc::clone(&self.listing);
                cache.search_async(query, move |result| match result {
                    Ok(results) => {
                        println!(
                            "{} pistes, {} artistes, {} albums",
                            results.tracks.len(),
                            results.artists.len(),
                            results.albums.len()
                        );
                        print_tracks(&results.tracks);
                        lock(&listing).tracks = results.tracks;
                    }
                    Err(err) => report("Recherche", err),
                })?;
            }
            Command::Rate(index, rating) => {
                let track = self.track_at(index)?;
                let label = track.to_string();
                cache.rate_track_async(track, rating, move |result| match result {
                    Ok(()) => println!("{label} : note {rating:?}"),
                    Err(err) => report("Notation", err),
                })?;
            }
            Command::Add(index) => {
                let track = self.track_at(index)?;
                let label = track.to_string();
                cache.add_to_my_library_async(track, move |result| match result {
                    Ok(true) => println!("{label} ajoutée à la bibliothèque"),
                    Ok(false) => println!("{label} était déjà dans la bibliothèque"),
                    Err(err) => report("Ajout", err),
                })?;
            }
            Command::Forget(index) => {
                let track = self.track_at(index)?;
                let label = track.to_string();
                cache.remove_from_my_library_async(track, move |result| match result {
                    Ok(true) => println!("{label} retirée de la bibliothèque"),
                    Ok(false) => println!("{label} n'était pas dans la bibliothèque"),
                    Err(err) => report("Retrait", err),
                })?;
            }
            Command::Refresh => {
                cache.invalidate();
                println!("Caches vidés.");
            }
            Command::Queue => {
                let current = player.current_index();
                let tracks = player.queue_tracks();
                if tracks.is_empty() {
                    println!("  (file vide)");
                }
                for (i, track) in tracks.iter().enumerate() {
                    let marker = if Some(i) == current { '>' } else { ' ' };
                    println!("{marker}{:>3}. {track}", i + 1);
                }
            }
            Command::Enqueue(index) => {
                player.append_to_queue(self.track_at(index)?);
            }
            Command::Dequeue(index) => {
                let track = player
                    .queue_tracks()
                    .get(index)
                    .cloned()
                    .ok_or_else(|| anyhow!("piste {} absente de la file", index + 1))?;
                player.remove_from_queue(&track)?;
            }
            Command::Play(Some(index)) => {
                let tracks = lock(&self.listing).tracks.clone();
                player.load_queue(tracks, Some(index))?;
            }
            Command::Play(None) => {
                // une file remplie par `enqueue` n'a pas encore de position
                if player.current_index().is_none() && !player.queue_tracks().is_empty() {
                    player.play_index(0)?;
                } else {
                    player.play_pause()?;
                }
            }
            Command::Pause => player.play_pause()?,
            Command::Next => {
                if player.advance(true)?.is_none() {
                    println!("File vide.");
                }
            }
            Command::Prev => {
                if player.retreat(true)?.is_none() {
                    println!("Pas de piste précédente.");
                }
            }
            Command::Stop => player.stop()?,
            Command::Seek(target) => player.seek(target)?,
            Command::Volume(volume) => {
                player.set_volume(volume)?;
                self.config.set_player_volume(volume)?;
            }
            Command::Shuffle => {
                let shuffle = player.toggle_shuffle();
                self.config.set_player_shuffle(shuffle)?;
            }
            Command::Repeat => {
                let repeat_one = player.toggle_repeat_one();
                self.config.set_player_repeat_one(repeat_one)?;
            }
            Command::Equalizer(None) => {
                let frequencies = player.equalizer_frequencies();
                let amps = player.equalizer_amps();
                for (band, (hz, amp)) in frequencies.iter().zip(amps.iter()).enumerate() {
                    println!("  {band}: {hz:>5} Hz  {amp:+.1} dB");
                }
            }
            Command::Equalizer(Some((band, amp))) => player.set_equalizer_band(band, amp)?,
            Command::Status => self.print_status(),
            Command::Quit => return Ok(false),
        }
        Ok(true)
    }

    fn print_status(&self) {
        let player = self.session.coordinator();
        let flags = player.flags();
        println!("Statut : {}", player.status().as_str());
        if let Some(track) = player.current_track() {
            let position = if player.status() == PlaybackStatus::Idle {
                0.0
            } else {
                player.position()
            };
            println!(
                "Piste : {} [{:.0} %] ({})",
                track,
                position * 100.0,
                track.duration_label()
            );
        }
        println!(
            "Volume : {}, aléatoire : {}, répétition : {}",
            player.volume(),
            on_off(flags.shuffle),
            on_off(flags.repeat_one)
        );
        println!(
            "Connecté : {}",
            on_off(self.session.cache().catalog().is_authenticated())
        );
    }
}

fn on_off(value: bool) -> &'static str {
    if value { "oui" } else { "non" }
}

fn prompt() {
    print!("> ");
    let _ = io::stdout().flush();
}
