//! Vues dérivées du cache de pistes.
//!
//! Rien ici n'est mis en cache : chaque appel recalcule la vue à partir des
//! pistes qu'on lui passe, si bien qu'elle ne peut pas être en retard sur
//! le cache de pistes.

use indexmap::IndexMap;
use std::cmp::Reverse;

use crate::models::{
    ALL_SONGS_ID, Album, AlbumKind, Artist, LIKED_SONGS_ID, Playlist, PlaylistKind, Rating,
    TrackRef,
};

/// Playlist "Liked Songs" : pistes notées pouce haut, la note la plus
/// récente d'abord.
pub fn liked_songs<'a>(tracks: impl IntoIterator<Item = &'a TrackRef>) -> Playlist {
    let mut liked: Vec<TrackRef> = tracks
        .into_iter()
        .filter(|t| t.rating() == Rating::ThumbsUp)
        .cloned()
        .collect();
    liked.sort_by_key(|t| Reverse(t.rating_changed_at()));

    Playlist {
        id: LIKED_SONGS_ID.to_string(),
        name: "Liked Songs".to_string(),
        kind: PlaylistKind::LikedSongs,
        tracks: liked,
    }
}

/// Regroupe les pistes par artiste d'album puis par album.
///
/// Les noms sont comparés sans tenir compte de la casse ; la graphie
/// retenue est celle de la première piste rencontrée. Les artistes et les
/// albums sont triés par nom, les pistes d'un album par numéro. Chaque
/// artiste commence par un album "All Songs" qui enchaîne tous ses albums.
pub fn group_artists<'a>(tracks: impl IntoIterator<Item = &'a TrackRef>) -> Vec<Artist> {
    let mut by_artist: IndexMap<String, (String, IndexMap<String, Album>)> = IndexMap::new();

    for track in tracks {
        let artist_name = track.display_album_artist();
        let (_, albums) = by_artist
            .entry(artist_name.to_lowercase())
            .or_insert_with(|| (artist_name.to_string(), IndexMap::new()));

        let album = albums
            .entry(track.album_name.to_lowercase())
            .or_insert_with(|| Album {
                id: track
                    .album_id
                    .clone()
                    .unwrap_or_else(|| format!("{}/{}", artist_name, track.album_name).to_lowercase()),
                name: track.album_name.clone(),
                artist: artist_name.to_string(),
                kind: AlbumKind::Regular,
                tracks: Vec::new(),
            });
        album.tracks.push(TrackRef::clone(track));
    }

    let mut artists: Vec<Artist> = by_artist
        .into_values()
        .map(|(name, albums)| {
            let mut albums: Vec<Album> = albums.into_values().collect();
            albums.sort_by_key(|a| a.name.to_lowercase());
            for album in &mut albums {
                album.tracks.sort_by_key(|t| t.track_number);
            }

            let all_songs = Album {
                id: format!("{}/{}", name.to_lowercase(), ALL_SONGS_ID),
                name: "All Songs".to_string(),
                artist: name.clone(),
                kind: AlbumKind::AllSongs,
                tracks: albums.iter().flat_map(|a| a.tracks.iter().cloned()).collect(),
            };

            let mut with_all = Vec::with_capacity(albums.len() + 1);
            with_all.push(all_songs);
            with_all.extend(albums);
            Artist {
                name,
                albums: with_all,
            }
        })
        .collect();

    artists.sort_by_key(|a| a.name.to_lowercase());
    artists
}

/// Albums réguliers d'une liste d'artistes, dans l'ordre des artistes.
pub fn regular_albums(artists: &[Artist]) -> Vec<Album> {
    artists
        .iter()
        .flat_map(|a| a.albums.iter())
        .filter(|a| a.kind == AlbumKind::Regular)
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Track, TrackSource};

    fn track(id: &str, artist: &str, album: &str, number: u32) -> TrackRef {
        Track::new(TrackSource::Library, format!("title {id}"), artist)
            .with_library_id(id)
            .with_album(album, "", number)
            .into_ref()
    }

    #[test]
    fn test_liked_songs_most_recent_first() {
        let old = Track::new(TrackSource::Library, "old", "a")
            .with_library_id("1")
            .with_rating(Rating::ThumbsUp, 100)
            .into_ref();
        let recent = Track::new(TrackSource::Library, "recent", "a")
            .with_library_id("2")
            .with_rating(Rating::ThumbsUp, 200)
            .into_ref();
        let disliked = Track::new(TrackSource::Library, "meh", "a")
            .with_library_id("3")
            .with_rating(Rating::ThumbsDown, 300)
            .into_ref();

        let playlist = liked_songs(&[old, recent, disliked]);
        let titles: Vec<_> = playlist.tracks.iter().map(|t| t.title.as_str()).collect();
        assert_eq!(playlist.kind, PlaylistKind::LikedSongs);
        assert_eq!(titles, vec!["recent", "old"]);
    }

    #[test]
    fn test_liked_songs_follow_rating_changes() {
        let song = track("1", "a", "x", 1);
        assert!(liked_songs([&song]).tracks.is_empty());

        song.set_rating(Rating::ThumbsUp);
        assert_eq!(liked_songs([&song]).tracks.len(), 1);
    }

    #[test]
    fn test_group_artists_case_insensitive_and_sorted() {
        let tracks = vec![
            track("1", "Zappa", "Hot Rats", 2),
            track("2", "abba", "Arrival", 1),
            track("3", "zappa", "Hot Rats", 1),
            track("4", "Zappa", "Apostrophe", 1),
        ];

        let artists = group_artists(&tracks);
        let names: Vec<_> = artists.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["abba", "Zappa"]);

        let zappa = &artists[1];
        assert_eq!(zappa.track_count(), 3);
        let albums: Vec<_> = zappa.albums.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(albums, vec!["All Songs", "Apostrophe", "Hot Rats"]);

        let hot_rats: Vec<_> = zappa.albums[2].tracks.iter().map(|t| t.track_number).collect();
        assert_eq!(hot_rats, vec![1, 2]);

        let all: Vec<_> = zappa.albums[0]
            .tracks
            .iter()
            .map(|t| t.library_id.as_deref().unwrap())
            .collect();
        assert_eq!(zappa.albums[0].kind, AlbumKind::AllSongs);
        assert_eq!(all, vec!["4", "3", "1"]);
    }

    #[test]
    fn test_regular_albums_skip_all_songs() {
        let tracks = vec![track("1", "a", "one", 1), track("2", "b", "two", 1)];
        let albums = regular_albums(&group_artists(&tracks));
        assert_eq!(albums.len(), 2);
        assert!(albums.iter().all(|a| a.kind == AlbumKind::Regular));
    }
}
