//! Fixtures shared by the unit tests.

use crate::catalog::CardRecord;

pub(crate) fn card(id: &str, coll: &str, title: &str, subtitle: &str, suffix: &str) -> CardRecord {
    CardRecord {
        id: id.to_string(),
        image_url: format!("https://cards.example/{}.png", id),
        wiki_url: format!("https://wiki.example/{}", id),
        collector_info: coll.to_string(),
        display_name: title.to_string(),
        title: title.to_string(),
        subtitle: subtitle.to_string(),
        title_suffix: suffix.to_string(),
        nicknames: String::new(),
        personas: String::new(),
    }
}

/// A small catalog covering the lookup paths the engine cares about
pub(crate) const SAMPLE_CATALOG: &str = "\
ID\tImageURL\tWikiURL\tCollInfo\tDisplayName\tTitle\tSubtitle\tTitleSuffix\tNicknames\tPersonas
SER004\timg/SER004.png\thttps://wiki.example/SER004\tSER004\t•Ben Kenobi\tBen Kenobi\t\t\tOld Ben\tObi-Wan
LS001\timg/LS001.png\thttps://wiki.example/LS001\tLS001\t•Luke Skywalker\tLuke Skywalker\t\t\tFarmboy\t
LS002\timg/LS002.png\thttps://wiki.example/LS002\tLS002\t•Luke Skywalker (V)\tLuke Skywalker\t\t(V)\t\t
LS003\timg/LS003.png\thttps://wiki.example/LS003\tLS003\t•Luke Skywalker (AI)\tLuke Skywalker\t\t(AI)\t\t
DS010\timg/DS010.png\thttps://wiki.example/DS010\tDS010\t•Darth Vader, Dark Lord Of The Sith\tDarth Vader\tDark Lord Of The Sith\t\tVader\tAnakin
DS011\timg/DS011.png\thttps://wiki.example/DS011\tDS011\t•Darth Vader (V)\tDarth Vader\t\t(V)\t\t
DS012\timg/DS012.png\thttps://wiki.example/DS012\tDS012\t•Darth Vader (AI)\tDarth Vader\t\t(AI)\t\t
HS001\timg/HS001.png\thttps://wiki.example/HS001\tHS001\t•Han Solo (V)\tHan Solo\t\t(V)\t\t
HS002\timg/HS002.png\thttps://wiki.example/HS002\tHS002\t•Han Solo (AI)\tHan Solo\t\t(AI)\t\t
";
